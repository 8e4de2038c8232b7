use ouroboros_talos_importmap::ImportMap;

/// Make JSON safe to embed inside a `<script>` element
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/").replace("<!--", "\\u003c!--")
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Entry document: the merged import map, then the entry module
pub fn entry_document(import_map: &ImportMap, entry: &str) -> String {
    let src = format!("/{}", entry.trim_start_matches("./").trim_start_matches('/'));

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Talos Dev Server</title>
    <script type="importmap">
{}
    </script>
</head>
<body>
    <div id="root"></div>
    <script type="module" src="{}"></script>
</body>
</html>
"#,
        escape_script(&import_map.to_json_pretty()),
        escape_attr(&src)
    )
}

/// Pull the import map back out of an entry document
pub fn extract_import_map(html: &str) -> Option<ImportMap> {
    let open = r#"<script type="importmap">"#;
    let start = html.find(open)? + open.len();
    let end = start + html[start..].find("</script>")?;
    ImportMap::from_json(&html[start..end]).ok()
}
