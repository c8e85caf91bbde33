//! XML listing rendering.
//!
//! Container and account listings requested with `format=xml` (or an XML
//! `Accept` header) are rendered here with `quick-xml`.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::storage::backend::{ContainerRow, ListingEntry, ObjectRow};
use crate::timestamp;

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn new_document() -> XmlWriter {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
    writer
}

fn finish(writer: XmlWriter) -> String {
    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Write `<tag>text</tag>`.
fn write_text_element(writer: &mut XmlWriter, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start element");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end element");
}

/// Write a group of simple child elements wrapped in a parent element.
fn write_simple_element_group(writer: &mut XmlWriter, parent: &str, children: &[(&str, &str)]) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, text) in children {
        write_text_element(writer, tag, text);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}

/// `<subdir name="p/"><name>p/</name></subdir>`
fn write_subdir(writer: &mut XmlWriter, name: &str) {
    let start = BytesStart::new("subdir").with_attributes([("name", name)]);
    writer
        .write_event(Event::Start(start))
        .expect("start subdir");
    write_text_element(writer, "name", name);
    writer
        .write_event(Event::End(BytesEnd::new("subdir")))
        .expect("end subdir");
}

/// Render a container listing.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <container name="photos">
///   <object><name>a.jpg</name><hash>...</hash><bytes>3</bytes>
///     <content_type>image/jpeg</content_type>
///     <last_modified>2024-01-02T03:04:05.000000</last_modified></object>
///   <subdir name="2024/"><name>2024/</name></subdir>
/// </container>
/// ```
pub fn render_container_listing(container: &str, rows: &[ListingEntry<ObjectRow>]) -> String {
    let mut writer = new_document();
    let root = BytesStart::new("container").with_attributes([("name", container)]);
    writer.write_event(Event::Start(root)).expect("start root");
    for row in rows {
        match row {
            ListingEntry::Item(object) => {
                let bytes = object.size.to_string();
                let last_modified = timestamp::parse(&object.timestamp)
                    .map(timestamp::iso8601)
                    .unwrap_or_default();
                write_simple_element_group(
                    &mut writer,
                    "object",
                    &[
                        ("name", object.name.as_str()),
                        ("hash", object.etag.as_str()),
                        ("bytes", bytes.as_str()),
                        ("content_type", object.content_type.as_str()),
                        ("last_modified", last_modified.as_str()),
                    ],
                );
            }
            ListingEntry::Subdir(name) => write_subdir(&mut writer, name),
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("container")))
        .expect("end root");
    finish(writer)
}

/// Render an account listing: one `<container>` per row with its name,
/// object count, and bytes used.
pub fn render_account_listing(account: &str, rows: &[ListingEntry<ContainerRow>]) -> String {
    let mut writer = new_document();
    let root = BytesStart::new("account").with_attributes([("name", account)]);
    writer.write_event(Event::Start(root)).expect("start root");
    for row in rows {
        match row {
            ListingEntry::Item(container) => {
                let count = container.object_count.to_string();
                let bytes = container.bytes_used.to_string();
                write_simple_element_group(
                    &mut writer,
                    "container",
                    &[
                        ("name", container.name.as_str()),
                        ("count", count.as_str()),
                        ("bytes", bytes.as_str()),
                    ],
                );
            }
            ListingEntry::Subdir(name) => write_subdir(&mut writer, name),
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("account")))
        .expect("end root");
    finish(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_listing() {
        let rows = vec![
            ListingEntry::Item(ObjectRow {
                name: "a&b".into(),
                timestamp: "0000000000.50000".into(),
                size: 3,
                content_type: "text/plain".into(),
                etag: "abc".into(),
            }),
            ListingEntry::Subdir("dir1/".into()),
        ];
        let xml = render_container_listing("c", &rows);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<container name=\"c\">"));
        assert!(xml.contains("<name>a&amp;b</name>"));
        assert!(xml.contains("<bytes>3</bytes>"));
        assert!(xml.contains("<last_modified>1970-01-01T00:00:00.500000</last_modified>"));
        assert!(xml.contains("<subdir name=\"dir1/\"><name>dir1/</name></subdir>"));
    }

    #[test]
    fn test_account_listing() {
        let rows = vec![ListingEntry::Item(ContainerRow {
            name: "c".into(),
            object_count: 2,
            bytes_used: 10,
        })];
        let xml = render_account_listing("AUTH_test", &rows);
        assert!(xml.contains("<account name=\"AUTH_test\">"));
        assert!(xml.contains("<container><name>c</name><count>2</count><bytes>10</bytes></container>"));
    }
}
