use crate::entities::decode_entities;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Doctype(String),
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End {
        name: String,
    },
    Text(String),
    Comment(String),
}

/// Content model of elements whose bodies are not tokenized as markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextMode {
    /// Taken verbatim (`script`, `style`).
    Raw,
    /// Character references decoded, no tags (`title`, `textarea`).
    Escapable,
}

fn text_mode(tag: &str) -> Option<TextMode> {
    match tag {
        "script" | "style" | "xmp" | "iframe" | "noembed" | "noframes" => Some(TextMode::Raw),
        "title" | "textarea" => Some(TextMode::Escapable),
        _ => None,
    }
}

pub(crate) fn tokenize(source: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0_usize;

    while i < bytes.len() {
        if starts_with(bytes, i, b"<!--") {
            let (comment, next) = read_comment(source, i);
            out.push(Token::Comment(comment.to_owned()));
            i = next;
            continue;
        }

        if bytes[i] == b'<' {
            if starts_with(bytes, i, b"</") {
                if let Some((tok, next)) = parse_end_tag(bytes, i) {
                    out.push(tok);
                    i = next;
                    continue;
                }
            } else if starts_with(bytes, i, b"<!") || starts_with(bytes, i, b"<?") {
                let (decl, next) = read_declaration(source, i);
                if let Some(name) = doctype_name(decl) {
                    out.push(Token::Doctype(name));
                }
                i = next;
                continue;
            } else if let Some((tok, next)) = parse_start_tag(bytes, i) {
                let mut text_tag: Option<(String, TextMode)> = None;
                if let Token::Start {
                    name, self_closing, ..
                } = &tok
                {
                    if !*self_closing {
                        text_tag = text_mode(name).map(|mode| (name.clone(), mode));
                    }
                }

                out.push(tok);
                i = next;

                if let Some((tag_name, mode)) = text_tag {
                    let (raw_text, closing_end) = read_text_until_end_tag(bytes, i, &tag_name);
                    if !raw_text.is_empty() {
                        let text = match mode {
                            TextMode::Raw => raw_text,
                            TextMode::Escapable => decode_entities(&raw_text),
                        };
                        out.push(Token::Text(text));
                    }
                    out.push(Token::End { name: tag_name });
                    i = closing_end.unwrap_or(bytes.len());
                }

                continue;
            }
        }

        let (text, next) = read_text(bytes, i);
        if !text.is_empty() {
            out.push(Token::Text(decode_entities(&text)));
        }
        i = next;
    }

    out
}

fn read_comment(source: &str, start: usize) -> (&str, usize) {
    let body = start.saturating_add(4);
    match source.get(body..).and_then(|rest| rest.find("-->")) {
        Some(offset) => (&source[body..body + offset], body + offset + 3),
        None => (source.get(body..).unwrap_or_default(), source.len()),
    }
}

fn read_declaration(source: &str, start: usize) -> (&str, usize) {
    let body = start.saturating_add(2);
    match source.get(body..).and_then(|rest| rest.find('>')) {
        Some(offset) => (&source[body..body + offset], body + offset + 1),
        None => (source.get(body..).unwrap_or_default(), source.len()),
    }
}

fn doctype_name(declaration: &str) -> Option<String> {
    let trimmed = declaration.trim_start();
    let keyword = trimmed.get(..7)?;
    if !keyword.eq_ignore_ascii_case("doctype") {
        return None;
    }
    let rest = trimmed[7..].trim();
    Some(if rest.is_empty() {
        "html".to_owned()
    } else {
        rest.to_owned()
    })
}

/// Text up to the next `<` that opens a tag, comment or declaration.
fn read_text(bytes: &[u8], start: usize) -> (String, usize) {
    let mut i = start.saturating_add(1);
    while i < bytes.len() {
        if bytes[i] == b'<' && opens_markup(bytes, i) {
            break;
        }
        i = i.saturating_add(1);
    }
    (String::from_utf8_lossy(&bytes[start..i]).to_string(), i)
}

fn opens_markup(bytes: &[u8], i: usize) -> bool {
    match bytes.get(i.saturating_add(1)).copied() {
        Some(b'/') | Some(b'!') | Some(b'?') => true,
        Some(byte) => byte.is_ascii_alphabetic(),
        None => false,
    }
}

fn read_text_until_end_tag(bytes: &[u8], start: usize, tag_name: &str) -> (String, Option<usize>) {
    let tag_bytes = tag_name.as_bytes();
    let mut i = start;

    while i < bytes.len() {
        if bytes[i] != b'<' || i + 2 + tag_bytes.len() > bytes.len() || bytes[i + 1] != b'/' {
            i = i.saturating_add(1);
            continue;
        }

        let name_start = i + 2;
        let name_end = name_start + tag_bytes.len();
        if !bytes[name_start..name_end].eq_ignore_ascii_case(tag_bytes) {
            i = i.saturating_add(1);
            continue;
        }

        let mut close = name_end;
        while close < bytes.len() && bytes[close].is_ascii_whitespace() {
            close = close.saturating_add(1);
        }

        if close < bytes.len() && bytes[close] == b'>' {
            let text = String::from_utf8_lossy(&bytes[start..i]).to_string();
            return (text, Some(close + 1));
        }

        i = i.saturating_add(1);
    }

    (String::from_utf8_lossy(&bytes[start..]).to_string(), None)
}

fn parse_end_tag(bytes: &[u8], start: usize) -> Option<(Token, usize)> {
    let mut i = start + 2;
    skip_spaces(bytes, &mut i);
    let begin = i;
    while i < bytes.len() && is_name_char(bytes[i]) {
        i += 1;
    }
    if i == begin {
        return None;
    }

    let name = String::from_utf8_lossy(&bytes[begin..i]).to_ascii_lowercase();
    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }

    Some((Token::End { name }, i + 1))
}

fn parse_start_tag(bytes: &[u8], start: usize) -> Option<(Token, usize)> {
    let mut i = start + 1;
    let begin = i;
    while i < bytes.len() && is_name_char(bytes[i]) {
        i += 1;
    }
    if i == begin {
        return None;
    }

    let name = String::from_utf8_lossy(&bytes[begin..i]).to_ascii_lowercase();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        skip_spaces(bytes, &mut i);
        if i >= bytes.len() {
            return None;
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' {
            i += 1;
            skip_spaces(bytes, &mut i);
            if i < bytes.len() && bytes[i] == b'>' {
                self_closing = true;
                i += 1;
                break;
            }
            continue;
        }

        let a_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }
        if i == a_start {
            // Unparseable byte inside the tag; skip it.
            i += 1;
            continue;
        }

        let a_name = String::from_utf8_lossy(&bytes[a_start..i]).to_ascii_lowercase();
        skip_spaces(bytes, &mut i);

        let mut val = String::new();
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_spaces(bytes, &mut i);
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let q = bytes[i];
                i += 1;
                let v_start = i;
                while i < bytes.len() && bytes[i] != q {
                    i += 1;
                }
                val = String::from_utf8_lossy(&bytes[v_start..i]).to_string();
                if i < bytes.len() && bytes[i] == q {
                    i += 1;
                }
            } else {
                let v_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                val = String::from_utf8_lossy(&bytes[v_start..i]).to_string();
            }
        }

        // First occurrence of a duplicated attribute wins.
        if !attrs.iter().any(|(existing, _)| *existing == a_name) {
            attrs.push((a_name, decode_entities(&val)));
        }
    }

    Some((
        Token::Start {
            name,
            attrs,
            self_closing,
        },
        i,
    ))
}

fn starts_with(bytes: &[u8], i: usize, pat: &[u8]) -> bool {
    let end = i.saturating_add(pat.len());
    end <= bytes.len() && &bytes[i..end] == pat
}

fn skip_spaces(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

fn is_attr_name_char(b: u8) -> bool {
    !b.is_ascii_whitespace() && !matches!(b, b'>' | b'/' | b'=' | b'"' | b'\'' | b'<')
}

#[cfg(test)]
mod tests {
    use super::Token;
    use super::tokenize;

    #[test]
    fn tokenizes_tags_attributes_and_text() {
        let tokens = tokenize("<a href=\"/x?a=1&amp;b=2\" data-turbo>Go &lt;now&gt;</a>");
        assert_eq!(
            tokens,
            vec![
                Token::Start {
                    name: "a".to_owned(),
                    attrs: vec![
                        ("href".to_owned(), "/x?a=1&b=2".to_owned()),
                        ("data-turbo".to_owned(), String::new()),
                    ],
                    self_closing: false,
                },
                Token::Text("Go <now>".to_owned()),
                Token::End {
                    name: "a".to_owned()
                },
            ]
        );
    }

    #[test]
    fn script_bodies_stay_raw() {
        let tokens = tokenize("<script>if (a<b) { x = '&amp;' }</script><p>");
        assert_eq!(
            tokens[1],
            Token::Text("if (a<b) { x = '&amp;' }".to_owned())
        );
        assert!(matches!(&tokens[3], Token::Start { name, .. } if name == "p"));
    }

    #[test]
    fn doctype_and_comments() {
        let tokens = tokenize("<!DOCTYPE html><!-- hi --><p>1 < 2</p>");
        assert_eq!(tokens[0], Token::Doctype("html".to_owned()));
        assert_eq!(tokens[1], Token::Comment(" hi ".to_owned()));
        assert_eq!(tokens[3], Token::Text("1 < 2".to_owned()));
    }

    #[test]
    fn unquoted_values_may_contain_slashes() {
        let tokens = tokenize("<a href=/inbox/1>");
        assert!(matches!(
            &tokens[0],
            Token::Start { attrs, .. } if attrs[0].1 == "/inbox/1"
        ));
    }
}
