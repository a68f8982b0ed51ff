//! Form submissions, including links that submit through
//! `data-turbo-method`.

use crate::visit::VisitAction;
use tr_core::DriveResult;
use tr_core::fresh_uid;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_dom::Selector;
use tr_net::FetchMethod;
use tr_net::FetchPurpose;
use tr_net::FetchRequest;
use tr_net::FormEncoding;
use tr_net::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormSubmissionState {
    Initialized,
    Requesting,
    Receiving,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct FormSubmission {
    id: String,
    form: Option<NodeId>,
    submitter: Option<NodeId>,
    method: FetchMethod,
    location: Location,
    encoding: FormEncoding,
    pairs: Vec<(String, String)>,
    confirm: Option<String>,
    visit_action: Option<VisitAction>,
    accepts_streams: bool,
    state: FormSubmissionState,
    pub(crate) request_id: Option<String>,
}

impl FormSubmission {
    /// Reads method, action, encoding and values from `form`, with
    /// `formmethod`/`formaction`/`formenctype` on `submitter` taking
    /// precedence.
    pub fn from_form(
        document: &Document,
        form: NodeId,
        submitter: Option<NodeId>,
        base: &Location,
    ) -> DriveResult<Self> {
        let method = submitter_or_form(document, submitter, "formmethod", form, "method")
            .and_then(FetchMethod::parse)
            .unwrap_or(FetchMethod::Get);
        let action = match submitter.filter(|node| document.has_attr(*node, "formaction")) {
            Some(node) => document.attr(node, "formaction").unwrap_or_default(),
            None => document.attr(form, "action").unwrap_or_default(),
        };
        let action = if action.trim().is_empty() {
            base.clone()
        } else {
            base.join(action)?
        };
        let encoding = submitter_or_form(document, submitter, "formenctype", form, "enctype")
            .map(FormEncoding::parse)
            .unwrap_or(FormEncoding::UrlEncoded);
        let pairs = form_data(document, form, submitter);
        let location = if method.is_safe() {
            action.with_query_pairs(&pairs)
        } else {
            action
        };

        Ok(Self {
            id: fresh_uid(),
            form: Some(form),
            submitter,
            method,
            location,
            encoding,
            pairs,
            confirm: first_attr(document, &[submitter, Some(form)], "data-turbo-confirm"),
            visit_action: first_attr(document, &[submitter, Some(form)], "data-turbo-action")
                .as_deref()
                .and_then(VisitAction::parse),
            accepts_streams: [submitter, Some(form)]
                .into_iter()
                .flatten()
                .any(|node| document.has_attr(node, "data-turbo-stream")),
            state: FormSubmissionState::Initialized,
            request_id: None,
        })
    }

    /// A link carrying `data-turbo-method` or `data-turbo-stream` behaves as
    /// a hidden form whose action is the link's `href`.
    pub fn from_link(document: &Document, link: NodeId, base: &Location) -> DriveResult<Self> {
        let href = document.attr(link, "href").unwrap_or_default();
        let location = base.join(href)?;
        let method = document
            .attr(link, "data-turbo-method")
            .and_then(FetchMethod::parse)
            .unwrap_or(FetchMethod::Get);
        let pairs: Vec<(String, String)> = if method.is_safe() {
            location
                .url()
                .query_pairs()
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            id: fresh_uid(),
            form: None,
            submitter: Some(link),
            method,
            location,
            encoding: FormEncoding::UrlEncoded,
            pairs,
            confirm: document.attr(link, "data-turbo-confirm").map(str::to_owned),
            visit_action: document
                .attr(link, "data-turbo-action")
                .and_then(VisitAction::parse),
            accepts_streams: document.has_attr(link, "data-turbo-stream"),
            state: FormSubmissionState::Initialized,
            request_id: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn form(&self) -> Option<NodeId> {
        self.form
    }

    pub fn submitter(&self) -> Option<NodeId> {
        self.submitter
    }

    pub fn method(&self) -> FetchMethod {
        self.method
    }

    pub fn is_safe(&self) -> bool {
        self.method.is_safe()
    }

    /// Where the request goes; GET submissions carry their values in the
    /// query.
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn encoding(&self) -> FormEncoding {
        self.encoding
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn confirm_message(&self) -> Option<&str> {
        self.confirm.as_deref()
    }

    pub fn visit_action(&self) -> Option<VisitAction> {
        self.visit_action
    }

    pub fn state(&self) -> FormSubmissionState {
        self.state
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn request(&self, purpose: FetchPurpose) -> DriveResult<FetchRequest> {
        let mut request = FetchRequest::new(self.method, self.location.clone(), purpose);
        if !self.method.is_safe() {
            let (content_type, body) = self.encoding.encode(&self.pairs);
            request.set_body(&content_type, body)?;
        }
        if self.accepts_streams || !self.method.is_safe() {
            request.accept_streams()?;
        }
        Ok(request)
    }

    pub(crate) fn start(&mut self, request_id: Option<String>) -> bool {
        if self.state != FormSubmissionState::Initialized {
            return false;
        }
        self.request_id = request_id;
        self.state = FormSubmissionState::Requesting;
        true
    }

    pub(crate) fn receive(&mut self) {
        if self.state == FormSubmissionState::Requesting {
            self.state = FormSubmissionState::Receiving;
        }
    }

    /// True when the submission was still waiting on its request.
    pub(crate) fn stop(&mut self) -> bool {
        let was_requesting = self.state == FormSubmissionState::Requesting;
        self.state = FormSubmissionState::Stopped;
        was_requesting
    }

    /// Marks the form and submitter busy while the request runs.
    pub(crate) fn reflect_busy(&self, document: &mut Document, busy: bool) -> DriveResult<()> {
        if let Some(form) = self.form.filter(|form| document.is_alive(*form)) {
            if busy {
                document.set_attr(form, "aria-busy", "true")?;
            } else {
                document.remove_attr(form, "aria-busy");
            }
        }
        if let Some(submitter) = self
            .submitter
            .filter(|node| document.is_alive(*node) && self.form.is_some())
        {
            document.toggle_attr(submitter, "disabled", busy)?;
        }
        Ok(())
    }
}

fn submitter_or_form<'d>(
    document: &'d Document,
    submitter: Option<NodeId>,
    submitter_attr: &str,
    form: NodeId,
    form_attr: &str,
) -> Option<&'d str> {
    submitter
        .and_then(|node| document.attr(node, submitter_attr))
        .or_else(|| document.attr(form, form_attr))
        .filter(|value| !value.trim().is_empty())
}

fn first_attr(document: &Document, nodes: &[Option<NodeId>], name: &str) -> Option<String> {
    nodes
        .iter()
        .flatten()
        .find_map(|node| document.attr(*node, name))
        .map(str::to_owned)
}

/// Name/value pairs the form submits, in tree order. Controls outside the
/// form join through a matching `form` attribute.
pub fn form_data(document: &Document, form: NodeId, submitter: Option<NodeId>) -> Vec<(String, String)> {
    let mut controls = document.descendants(form);
    if let Some(id) = document.element_id(form) {
        let owned = Selector::attribute_equals(None, "form", id);
        controls.extend(
            document
                .query_all(document.root(), &owned)
                .into_iter()
                .filter(|node| !document.contains(form, *node)),
        );
    }

    let mut pairs = Vec::new();
    for control in controls {
        let Some(name) = document.attr(control, "name").filter(|name| !name.is_empty()) else {
            continue;
        };
        if document.has_attr(control, "disabled") {
            continue;
        }
        let name = name.to_owned();
        match document.tag(control) {
            Some("input") => {
                let kind = document
                    .attr(control, "type")
                    .unwrap_or("text")
                    .to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "reset" | "image" | "file" => {}
                    "checkbox" | "radio" => {
                        if document.checked(control) {
                            pairs.push((name, document.value(control)));
                        }
                    }
                    _ => pairs.push((name, document.value(control))),
                }
            }
            Some("textarea") => pairs.push((name, document.value(control))),
            Some("select") => {
                for option in document.selected_options(control) {
                    pairs.push((name.clone(), document.value(option)));
                }
            }
            _ => {}
        }
    }

    if let Some(submitter) = submitter {
        if let Some(name) = document.attr(submitter, "name").filter(|name| !name.is_empty()) {
            pairs.push((name.to_owned(), document.value(submitter)));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::FormSubmission;
    use super::form_data;
    use crate::visit::VisitAction;
    use tr_dom::Document;
    use tr_dom::NodeId;
    use tr_net::FetchMethod;
    use tr_net::FetchPurpose;
    use tr_net::Location;

    fn document(html: &str) -> Document {
        match tr_html::parse_document(html) {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        }
    }

    fn by_id(document: &Document, id: &str) -> NodeId {
        match document.element_by_id(id) {
            Some(node) => node,
            None => panic!("#{id} missing"),
        }
    }

    fn base() -> Location {
        match Location::parse("https://example.com/messages/new") {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        }
    }

    const FORM: &str = "<body><form id=\"f\" action=\"/messages\" method=\"post\" data-turbo-confirm=\"Sure?\">\
        <input name=\"title\" value=\"Hi\">\
        <input type=\"checkbox\" name=\"pin\" value=\"yes\" checked>\
        <input type=\"checkbox\" name=\"mute\">\
        <input name=\"off\" value=\"x\" disabled>\
        <textarea name=\"body\">Hello</textarea>\
        <select name=\"tag\" multiple><option selected>a</option><option>b</option><option value=\"c\" selected>C</option></select>\
        <button id=\"send\" name=\"commit\" value=\"send\">Send</button>\
        <button id=\"draft\" name=\"commit\" value=\"draft\" formaction=\"/drafts\" formmethod=\"get\">Draft</button>\
        </form><input name=\"outside\" form=\"f\" value=\"o\"></body>";

    #[test]
    fn collects_successful_controls_in_order() {
        let page = document(FORM);
        let pairs = form_data(&page, by_id(&page, "f"), Some(by_id(&page, "send")));
        let expected: Vec<(String, String)> = [
            ("title", "Hi"),
            ("pin", "yes"),
            ("body", "Hello"),
            ("tag", "a"),
            ("tag", "c"),
            ("outside", "o"),
            ("commit", "send"),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn dropdowns_submit_their_default_option() {
        let page = document(
            "<body><form id=\"f\"><select name=\"size\"><option>s</option><option>m</option></select>\
             <select name=\"color\"><option disabled>pick</option><option value=\"red\">Red</option></select></form></body>",
        );
        let pairs = form_data(&page, by_id(&page, "f"), None);
        let expected = vec![
            ("size".to_owned(), "s".to_owned()),
            ("color".to_owned(), "red".to_owned()),
        ];
        assert_eq!(pairs, expected);
    }

    #[test]
    fn post_submissions_encode_a_body_and_accept_streams() {
        let page = document(FORM);
        let submission = match FormSubmission::from_form(&page, by_id(&page, "f"), Some(by_id(&page, "send")), &base()) {
            Ok(submission) => submission,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(submission.method(), FetchMethod::Post);
        assert_eq!(submission.location().path(), "/messages");
        assert_eq!(submission.confirm_message(), Some("Sure?"));

        let request = match submission.request(FetchPurpose::FormSubmission) {
            Ok(request) => request,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(request.header("Content-Type"), Some("application/x-www-form-urlencoded"));
        assert!(String::from_utf8_lossy(&request.body).contains("title=Hi"));
        assert!(request.header("Accept").is_some_and(|accept| accept.starts_with("text/vnd.turbo-stream.html")));
    }

    #[test]
    fn submitter_overrides_send_get_values_in_the_query() {
        let page = document(FORM);
        let submission = match FormSubmission::from_form(&page, by_id(&page, "f"), Some(by_id(&page, "draft")), &base()) {
            Ok(submission) => submission,
            Err(error) => panic!("{error}"),
        };
        assert!(submission.is_safe());
        assert_eq!(submission.location().path(), "/drafts");
        assert!(submission.location().query().is_some_and(|query| query.contains("commit=draft")));
        let request = match submission.request(FetchPurpose::FormSubmission) {
            Ok(request) => request,
            Err(error) => panic!("{error}"),
        };
        assert!(request.body.is_empty());
    }

    #[test]
    fn method_links_become_submissions() {
        let page = document(
            "<body><a id=\"del\" href=\"/messages/1\" data-turbo-method=\"delete\" data-turbo-action=\"replace\">x</a></body>",
        );
        let submission = match FormSubmission::from_link(&page, by_id(&page, "del"), &base()) {
            Ok(submission) => submission,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(submission.method(), FetchMethod::Delete);
        assert_eq!(submission.location().path(), "/messages/1");
        assert_eq!(submission.visit_action(), Some(VisitAction::Replace));
        assert!(submission.form().is_none());
    }
}
