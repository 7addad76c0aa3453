use async_trait::async_trait;
use pipecore::{Invocable, NodeContext, NodeError, NodeOutput, Parameter, ValueMap};
use piperuntime::{FunctionFactory, FunctionMetadata};
use std::sync::Arc;

/// Fill `{name}` placeholders from `values`. `{{` and `}}` are literal braces.
///
/// A placeholder with no matching value is a `MissingInput` error.
pub fn render_template(template: &str, values: &ValueMap) -> Result<String, NodeError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(NodeError::Configuration(format!(
                        "unterminated placeholder '{{{}' in template",
                        name
                    )));
                }
                let name = name.trim();
                let value = values
                    .get(name)
                    .ok_or_else(|| NodeError::MissingInput(name.to_string()))?;
                out.push_str(&value.to_display_string());
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Renders the `template` config entry with the node's inputs
pub struct TextFormat;

#[async_trait]
impl Invocable for TextFormat {
    fn kind(&self) -> &str {
        "text.format"
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let template = ctx.require_config("template")?.as_str().ok_or_else(|| {
            NodeError::Configuration("template must be a string".to_string())
        })?;

        let text = render_template(template, &ctx.inputs)?;
        Ok(NodeOutput::new().with_output("text", text))
    }
}

pub struct TextFormatFactory;

impl FunctionFactory for TextFormatFactory {
    fn create(&self, config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        match config.get("template") {
            Some(t) if t.as_str().is_some() => Ok(Arc::new(TextFormat)),
            _ => Err(NodeError::Configuration(
                "text.format requires a string 'template' in config".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "text.format"
    }

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata {
            description: "Render a text template with {name} placeholders".to_string(),
            category: "text".to_string(),
            inputs: Vec::new(),
            outputs: vec![Parameter::new("text", "string")],
        }
    }
}
