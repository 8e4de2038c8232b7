/// Wrap a stylesheet in an ES module that injects it into the document.
///
/// Served for `import "./app.css"` so the browser's module loader can
/// evaluate stylesheet imports; the `<style>` element is keyed by `id`
/// so re-imports replace instead of duplicating.
pub fn css_module(id: &str, source: &str) -> String {
    // Escape CSS for JavaScript template literal
    let escaped_css = source
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${");

    let escaped_id = serde_json::to_string(id).unwrap_or_else(|_| "\"\"".to_string());

    format!(
        r#"// CSS Module Injection
const css = `{css}`;
if (typeof document !== 'undefined') {{
  const id = {id};
  let style = document.querySelector(`style[data-talos-css="${{id}}"]`);
  if (!style) {{
    style = document.createElement('style');
    style.setAttribute('data-talos-css', id);
    document.head.appendChild(style);
  }}
  style.textContent = css;
}}
export default css;
"#,
        css = escaped_css,
        id = escaped_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_injection_code() {
        let code = css_module("/src/app.css", ".test { color: red; }");

        assert!(code.contains("createElement('style')"));
        assert!(code.contains("appendChild"));
        assert!(code.contains(".test { color: red; }"));
        assert!(code.contains(r#"const id = "/src/app.css";"#));
        assert!(code.contains("export default css;"));
    }

    #[test]
    fn test_css_escaping() {
        let code = css_module("a.css", r#".test { content: "hello `world` ${foo}"; }"#);

        // Should escape template literal special characters
        assert!(code.contains("\\`world\\`"));
        assert!(code.contains("\\${foo}"));
    }
}
