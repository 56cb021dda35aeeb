//! Reply composition: plain markdown body plus the optional richtext document.

use serde_json::{Value, json};

use crate::matcher::ResolvedMatch;

pub const DEFAULT_BODY: &str = "{images}\n\n\
---\n\n\
^(I'm a bot. The author of the parent comment can) \
[^(delete this reply)](https://www.reddit.com/message/compose/?to={username}&subject=delete&message=delete%20{comment_id})";

pub const DEFAULT_FORCED: &str = "^(Did you mean this?)\n\n{images}\n\n\
---\n\n\
^(I'm a bot. The author of the parent comment can) \
[^(delete this reply)](https://www.reddit.com/message/compose/?to={username}&subject=delete&message=delete%20{comment_id})";

pub const DEFAULT_EXPORT: &str = "Reply with `word.png` to get an image from u/{username}.\n\n\
{table}\n\n\
^(Updated {timestamp})";

fn default_footer() -> Value {
    json!([{
        "e": "par",
        "c": [
            {"e": "text", "t": "I'm a bot. The author of the parent comment can "},
            {
                "e": "link",
                "t": "delete this reply",
                "u": "https://www.reddit.com/message/compose/?to={username}&subject=delete&message=delete%20{comment_id}"
            }
        ]
    }])
}

fn default_header() -> Value {
    json!({"e": "par", "c": [{"e": "text", "t": "Did you mean this?"}]})
}

/// Replace every `{key}` in `template` with its value.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Apply `fill` to every string inside a JSON value.
fn fill_value(value: &mut Value, vars: &[(&str, &str)]) {
    match value {
        Value::String(s) => *s = fill(s, vars),
        Value::Array(items) => items.iter_mut().for_each(|v| fill_value(v, vars)),
        Value::Object(map) => map.values_mut().for_each(|v| fill_value(v, vars)),
        _ => {}
    }
}

/// Reply templates. `body`/`forced` use `{images}`, `{username}`,
/// `{comment_id}`; the richtext `footer` is an array of document nodes and
/// `header` a single node prepended to forced replies.
#[derive(Debug, Clone, PartialEq)]
pub struct Templates {
    pub body: String,
    pub forced: String,
    pub footer: Value,
    pub header: Value,
    pub export: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            body: DEFAULT_BODY.to_string(),
            forced: DEFAULT_FORCED.to_string(),
            footer: default_footer(),
            header: default_header(),
            export: DEFAULT_EXPORT.to_string(),
        }
    }
}

impl Templates {
    /// Markdown reply listing every match as `[word.ext](url)`.
    pub fn compose_body(
        &self,
        matches: &[ResolvedMatch],
        forced: bool,
        username: &str,
        comment_id: &str,
    ) -> String {
        let images = matches
            .iter()
            .map(|m| format!("[{}]({})", m.label(), m.image.url))
            .collect::<Vec<_>>()
            .join("\n\n");
        let template = if forced { &self.forced } else { &self.body };
        fill(
            template,
            &[
                ("images", images.as_str()),
                ("username", username),
                ("comment_id", comment_id),
            ],
        )
    }

    /// Richtext document embedding the image natively.
    ///
    /// Only a single match with a platform media reference qualifies.
    pub fn compose_richtext(
        &self,
        matches: &[ResolvedMatch],
        forced: bool,
        username: &str,
        comment_id: &str,
    ) -> Option<Value> {
        let [m] = matches else {
            return None;
        };
        let media_id = m.image.external_ref.as_deref()?;

        let mut document = Vec::new();
        if forced {
            document.push(self.header.clone());
        }
        document.push(json!({
            "e": "par",
            "c": [{"e": "link", "t": m.label(), "u": m.image.url}]
        }));
        document.push(json!({"e": "img", "id": media_id}));

        let mut footer = self.footer.clone();
        fill_value(
            &mut footer,
            &[("username", username), ("comment_id", comment_id)],
        );
        match footer {
            Value::Array(nodes) => document.extend(nodes),
            Value::Null => {}
            node => document.push(node),
        }

        Some(json!({ "document": document }))
    }
}
