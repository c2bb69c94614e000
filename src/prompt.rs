use std::collections::HashMap;

/// Fill `{name}` placeholders in a template. Unresolved placeholders are
/// logged and left in place; a partially rendered prompt is always better
/// than aborting an execution over a missing parameter.
pub fn render(template: &str, params: &HashMap<String, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            rendered.push(c);
            continue;
        }

        let mut name = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                closed = true;
                break;
            }
            name.push(inner);
        }

        if !closed {
            // Dangling brace at end of template
            rendered.push('{');
            rendered.push_str(&name);
            continue;
        }

        match params.get(&name) {
            Some(value) => rendered.push_str(value),
            None => {
                tracing::warn!(placeholder = %name, "unresolved prompt placeholder");
                rendered.push('{');
                rendered.push_str(&name);
                rendered.push('}');
            }
        }
    }

    rendered
}
