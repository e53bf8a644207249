//! Content source: emits configured text as raw-line messages.

use crate::component::{Component, ComponentCategory, ComponentContext, ComponentDecl, CancellationToken};
use crate::error::{ComponentError, ConfigError};
use crate::message::{Message, MessageType};
use crate::settings::{SettingDefinition, SettingType};
use crate::target::MessageTarget;
use std::path::PathBuf;

pub const CONTENT: &str = "content";
pub const PATH: &str = "path";
pub const ROWS_PER_MESSAGE: &str = "rows.per.message";

const DEFAULT_ROWS_PER_MESSAGE: usize = 1000;

#[derive(Debug, Clone)]
enum Origin {
    Inline(Vec<u8>),
    File(PathBuf),
}

#[derive(Debug, Clone)]
struct ContentConfig {
    origin: Origin,
    rows_per_message: usize,
}

/// Head-of-flow source for inline text or a file.
///
/// Lines are split on `\n` (a trailing `\r` is dropped) and left in their
/// source encoding. On its first inbound message the source emits the lines
/// in batches of `rows.per.message`; the final batch carries the inbound
/// last-message flag.
#[derive(Debug, Default)]
pub struct ContentSource {
    config: Option<ContentConfig>,
    cancel: CancellationToken,
    emitted: bool,
}

impl Component for ContentSource {
    fn decl(&self) -> &ComponentDecl {
        static DECL: std::sync::OnceLock<ComponentDecl> = std::sync::OnceLock::new();
        DECL.get_or_init(|| {
            ComponentDecl::new(
                "content",
                ComponentCategory::Source,
                MessageType::None,
                MessageType::Text,
            )
            .description("Emit inline text or a file's lines as raw-line messages")
            .setting(SettingDefinition::new(CONTENT, "Inline content", SettingType::Text))
            .setting(SettingDefinition::new(PATH, "File path", SettingType::Text))
            .setting(
                SettingDefinition::new(ROWS_PER_MESSAGE, "Lines per message", SettingType::Integer)
                    .default_value(DEFAULT_ROWS_PER_MESSAGE.to_string()),
            )
        })
    }

    fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        let settings = ctx.settings();
        let origin = match (settings.get(CONTENT), settings.get(PATH)) {
            (Some(content), _) => Origin::Inline(content.as_bytes().to_vec()),
            (None, Some(path)) if !path.trim().is_empty() => Origin::File(PathBuf::from(path)),
            _ => return Err(ConfigError::MissingSetting(CONTENT.into()).into()),
        };
        let rows_per_message = settings.usize_or(ROWS_PER_MESSAGE, DEFAULT_ROWS_PER_MESSAGE)?;
        if rows_per_message == 0 {
            return Err(ConfigError::InvalidSetting {
                name: ROWS_PER_MESSAGE.into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }

        self.config = Some(ContentConfig {
            origin,
            rows_per_message,
        });
        self.cancel = ctx.cancel.clone();
        Ok(())
    }

    fn handle(
        &mut self,
        message: &Message,
        target: &mut dyn MessageTarget,
        _unit_of_work_boundary: bool,
    ) -> Result<(), ComponentError> {
        let config = self.config.as_ref().ok_or(ComponentError::NotStarted)?;
        let last = message.is_last();

        if self.emitted {
            if last {
                target.put(Message::empty().last(true))?;
            }
            return Ok(());
        }
        self.emitted = true;

        let bytes = match &config.origin {
            Origin::Inline(bytes) => bytes.clone(),
            Origin::File(path) => {
                std::fs::read(path).map_err(|e| {
                    ComponentError::Other(format!("failed to read {}: {}", path.display(), e).into())
                })?
            }
        };
        let lines = split_lines(&bytes);
        if lines.is_empty() {
            target.put(Message::empty().last(last))?;
            return Ok(());
        }

        let batches = lines.chunks(config.rows_per_message).count();
        for (i, batch) in lines.chunks(config.rows_per_message).enumerate() {
            self.cancel.check()?;
            let is_final = i + 1 == batches;
            target.put(Message::lines(batch.to_vec()).last(last && is_final))?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.config = None;
    }
}

/// Split on `\n`, dropping a trailing `\r` per line and the empty tail after
/// a final newline.
fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    body.split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .collect()
}
