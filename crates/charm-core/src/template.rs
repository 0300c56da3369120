//! `${name}` placeholder substitution for manifest templates.

use core::error::Error;

use error_stack::Report;

use crate::context::ManifestContext;

#[derive(Debug, derive_more::Display)]
pub enum TemplateError {
    #[display("Template {template} references undefined variable '{name}'")]
    UndefinedVariable { template: String, name: String },
    #[display("Template {template} has an unterminated placeholder at byte {offset}")]
    Unterminated { template: String, offset: usize },
}

impl Error for TemplateError {}

/// Renders `text` against `context`.
///
/// `${name}` is replaced by the value of `name`, `$$` produces a literal `$`
/// and any other `$` is copied through untouched. Rendering is a pure
/// function of its inputs.
pub fn render(
    template: &str,
    text: &str,
    context: &ManifestContext,
) -> Result<String, Report<TemplateError>> {
    let mut rendered = String::with_capacity(text.len());
    let mut rest = text;
    let mut offset = 0;

    while let Some(index) = rest.find('$') {
        rendered.push_str(&rest[..index]);
        let after = &rest[index + 1..];

        if let Some(stripped) = after.strip_prefix('$') {
            rendered.push('$');
            offset += index + 2;
            rest = stripped;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body.find('}').ok_or_else(|| {
                Report::new(TemplateError::Unterminated {
                    template: template.to_string(),
                    offset: offset + index,
                })
            })?;
            let name = body[..end].trim();
            let value = context.get(name).ok_or_else(|| {
                Report::new(TemplateError::UndefinedVariable {
                    template: template.to_string(),
                    name: name.to_string(),
                })
            })?;
            rendered.push_str(&value.to_string());
            let consumed = index + 2 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        } else {
            rendered.push('$');
            offset += index + 1;
            rest = after;
        }
    }

    rendered.push_str(rest);
    Ok(rendered)
}
