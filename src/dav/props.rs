//! DAV properties and the XML bodies built from them.

use crate::{
    dav::{
        collection::{COLLECTION_MARKER, is_collection},
        path::href_for,
        xml::Namespace,
    },
    models::object::StoredObject,
};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;
const STATUS_OK: &str = "HTTP/1.1 200 OK";

/// Advertised lock capabilities. Shared locks are listed but not enforced.
pub const SUPPORTED_LOCK: &str = "<supportedlock>\
<lockentry><lockscope><exclusive/></lockscope><locktype><write/></locktype></lockentry>\
<lockentry><lockscope><shared/></lockscope><locktype><write/></locktype></lockentry>\
</supportedlock>";

/// RFC 1123 date as used by `getlastmodified` and HTTP headers.
pub fn http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Escape XML special characters in text and attribute values.
pub fn xml_escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// The live property set of one resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DavProperties {
    pub creationdate: Option<String>,
    pub displayname: Option<String>,
    pub getcontentlanguage: Option<String>,
    pub getcontentlength: Option<String>,
    pub getcontenttype: Option<String>,
    pub getetag: Option<String>,
    pub getlastmodified: Option<String>,
    /// Raw XML: the collection marker or empty.
    pub resourcetype: String,
}

impl DavProperties {
    /// The virtual root collection, dated `now`.
    pub fn root(now: &DateTime<Utc>) -> Self {
        Self {
            creationdate: Some(http_date(now)),
            getcontentlength: Some("0".to_string()),
            getlastmodified: Some(http_date(now)),
            resourcetype: COLLECTION_MARKER.to_string(),
            ..Self::default()
        }
    }

    pub fn from_object(object: &StoredObject) -> Self {
        let meta = &object.http_metadata;
        Self {
            creationdate: Some(http_date(&object.uploaded)),
            displayname: meta.content_disposition.clone(),
            getcontentlanguage: meta.content_language.clone(),
            getcontentlength: Some(object.size.to_string()),
            getcontenttype: meta.content_type.clone(),
            getetag: Some(object.http_etag()),
            getlastmodified: Some(http_date(&object.uploaded)),
            resourcetype: if is_collection(object) {
                COLLECTION_MARKER.to_string()
            } else {
                String::new()
            },
        }
    }

    fn text_properties(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("creationdate", self.creationdate.as_deref()),
            ("displayname", self.displayname.as_deref()),
            ("getcontentlanguage", self.getcontentlanguage.as_deref()),
            ("getcontentlength", self.getcontentlength.as_deref()),
            ("getcontenttype", self.getcontenttype.as_deref()),
            ("getetag", self.getetag.as_deref()),
            ("getlastmodified", self.getlastmodified.as_deref()),
        ]
    }
}

/// One `<response>` of a PROPFIND multistatus.
///
/// `object` is `None` for the root, which emits every property even when
/// empty. `lock` is a stored `lockdiscovery` fragment, embedded verbatim.
pub fn propfind_entry(object: Option<&StoredObject>, lock: Option<&str>) -> String {
    let (href, props, emit_empty) = match object {
        Some(object) => (
            href_for(&object.key, is_collection(object)),
            DavProperties::from_object(object),
            false,
        ),
        None => (href_for("", true), DavProperties::root(&Utc::now()), true),
    };

    let mut out = String::new();
    let _ = write!(
        out,
        "\n<response><href>{}</href><propstat><prop>",
        xml_escape(&href)
    );
    for (name, value) in props.text_properties() {
        match value {
            Some(value) => {
                let _ = write!(out, "<{name}>{}</{name}>", xml_escape(value));
            }
            None if emit_empty => {
                let _ = write!(out, "<{name}></{name}>");
            }
            None => {}
        }
    }
    let _ = write!(out, "<resourcetype>{}</resourcetype>", props.resourcetype);
    match lock {
        Some(fragment) => out.push_str(fragment),
        None if emit_empty => out.push_str("<lockdiscovery></lockdiscovery>"),
        None => {}
    }
    out.push_str(SUPPORTED_LOCK);
    let _ = write!(
        out,
        "</prop><status>{STATUS_OK}</status></propstat></response>"
    );
    out
}

/// Builder for a `207 Multi-Status` body.
pub struct MultiStatus {
    body: String,
}

impl Default for MultiStatus {
    fn default() -> Self {
        Self::with_namespaces(&[])
    }
}

impl MultiStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare extra prefixed namespaces on `<multistatus>`, next to `DAV:`.
    pub fn with_namespaces(namespaces: &[Namespace]) -> Self {
        let mut body = format!("{XML_DECLARATION}\n<multistatus xmlns=\"DAV:\"");
        for ns in namespaces {
            let _ = write!(body, " xmlns:{}=\"{}\"", ns.prefix, xml_escape(&ns.uri));
        }
        body.push('>');
        Self { body }
    }

    pub fn push(&mut self, entry: &str) {
        self.body.push_str(entry);
    }

    pub fn finish(mut self) -> String {
        self.body.push_str("\n</multistatus>\n");
        self.body
    }
}

/// PROPPATCH result: every named property reported as applied.
pub fn proppatch_response(href: &str, names: &[String], namespaces: &[Namespace]) -> String {
    let mut status = MultiStatus::with_namespaces(namespaces);
    let mut entry = format!(
        "\n<response><href>{}</href><propstat><prop>",
        xml_escape(href)
    );
    for name in names {
        let _ = write!(entry, "<{name} />");
    }
    let _ = write!(
        entry,
        "</prop><status>{STATUS_OK}</status></propstat></response>"
    );
    status.push(&entry);
    status.finish()
}

/// LOCK result body wrapping a `lockdiscovery` fragment.
pub fn lock_response(discovery: &str) -> String {
    format!("{XML_DECLARATION}\n<prop xmlns=\"DAV:\">\n{discovery}\n</prop>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dav::collection::collection_metadata;
    use crate::models::object::{CustomMetadata, HttpMetadata};
    use chrono::TimeZone;

    fn document() -> StoredObject {
        StoredObject {
            key: "a/b & c.txt".into(),
            size: 42,
            etag: "d41d8cd98f00b204e9800998ecf8427e".into(),
            http_metadata: HttpMetadata {
                content_type: Some("text/plain".into()),
                ..HttpMetadata::default()
            },
            custom_metadata: CustomMetadata::new(),
            uploaded: Utc.with_ymd_and_hms(1994, 11, 15, 8, 12, 31).unwrap(),
        }
    }

    #[test]
    fn formats_http_dates() {
        let date = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(http_date(&date), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn escapes_xml() {
        assert_eq!(xml_escape("a<b>&\"'"), "a&lt;b&gt;&amp;&quot;&apos;");
    }

    #[test]
    fn document_entry_omits_absent_properties() {
        let entry = propfind_entry(Some(&document()), None);
        assert!(entry.contains("<href>/a/b%20%26%20c.txt</href>"));
        assert!(entry.contains("<getcontentlength>42</getcontentlength>"));
        assert!(entry.contains("<getcontenttype>text/plain</getcontenttype>"));
        assert!(
            entry.contains("<getetag>&quot;d41d8cd98f00b204e9800998ecf8427e&quot;</getetag>")
        );
        assert!(entry.contains("<getlastmodified>Tue, 15 Nov 1994 08:12:31 GMT</getlastmodified>"));
        assert!(entry.contains("<resourcetype></resourcetype>"));
        assert!(!entry.contains("displayname"));
        assert!(!entry.contains("lockdiscovery"));
        assert!(entry.contains(SUPPORTED_LOCK));
        assert!(entry.contains("<status>HTTP/1.1 200 OK</status>"));
    }

    #[test]
    fn collection_entry_has_trailing_slash_and_lock() {
        let mut object = document();
        object.key = "dir".into();
        object.custom_metadata = collection_metadata();
        let lock = "<lockdiscovery><activelock/></lockdiscovery>";

        let entry = propfind_entry(Some(&object), Some(lock));
        assert!(entry.contains("<href>/dir/</href>"));
        assert!(entry.contains("<resourcetype><collection /></resourcetype>"));
        assert!(entry.contains(lock));
    }

    #[test]
    fn root_entry_emits_every_property() {
        let entry = propfind_entry(None, None);
        assert!(entry.contains("<href>/</href>"));
        for name in [
            "creationdate",
            "displayname",
            "getcontentlanguage",
            "getcontenttype",
            "getetag",
            "getlastmodified",
            "lockdiscovery",
        ] {
            assert!(entry.contains(&format!("<{name}>")), "missing {name}");
        }
        assert!(entry.contains("<getcontentlength>0</getcontentlength>"));
        assert!(entry.contains("<resourcetype><collection /></resourcetype>"));
    }

    #[test]
    fn multistatus_declares_namespaces() {
        let ns = [Namespace {
            prefix: "Z".into(),
            uri: "urn:schemas-microsoft-com:".into(),
        }];
        let body = proppatch_response("/f.txt", &["Z:Win32FileAttributes".into()], &ns);
        assert!(body.starts_with(XML_DECLARATION));
        assert!(body.contains(r#"<multistatus xmlns="DAV:" xmlns:Z="urn:schemas-microsoft-com:">"#));
        assert!(body.contains("<Z:Win32FileAttributes />"));
        assert!(body.trim_end().ends_with("</multistatus>"));
    }
}
