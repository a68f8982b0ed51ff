/// Decodes named and numeric character references. Unknown references are
/// left as written.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut cursor = 0_usize;

    while let Some(rel_amp) = input[cursor..].find('&') {
        let amp = cursor + rel_amp;
        out.push_str(&input[cursor..amp]);

        let rest = &input[(amp + 1)..];
        let terminator = rest
            .find(|ch: char| ch == ';' || ch.is_whitespace() || ch == '&' || ch == '<')
            .filter(|idx| rest.as_bytes()[*idx] == b';');
        let Some(rel_semi) = terminator else {
            out.push('&');
            cursor = amp + 1;
            continue;
        };

        let semi = amp + 1 + rel_semi;
        match decode_entity(&input[(amp + 1)..semi]) {
            Some(decoded) => {
                out.push(decoded);
                cursor = semi + 1;
            }
            None => {
                out.push('&');
                cursor = amp + 1;
            }
        }
    }

    out.push_str(&input[cursor..]);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    let named = match entity {
        "nbsp" => '\u{a0}',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "middot" => '\u{b7}',
        "bull" => '\u{2022}',
        "times" => '\u{d7}',
        "euro" => '\u{20ac}',
        _ => {
            let value = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse::<u32>().ok()?
            };
            return char::from_u32(value).filter(|ch| *ch != '\0');
        }
    };
    Some(named)
}

#[cfg(test)]
mod tests {
    use super::decode_entities;

    #[test]
    fn decodes_named_and_numeric_references() {
        assert_eq!(decode_entities("a &amp; b &#x41;&#66; &hellip;"), "a & b AB \u{2026}");
    }

    #[test]
    fn leaves_unknown_and_unterminated_references() {
        assert_eq!(decode_entities("&bogus; & x &amp"), "&bogus; & x &amp");
        assert_eq!(decode_entities("?a=1&b=2"), "?a=1&b=2");
    }
}
