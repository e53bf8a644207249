//! Entity records → delimited text.

use crate::config::{
    ATTRIBUTE_FORMAT_FUNCTION, ATTRIBUTE_ORDINAL, BINDING_KEYS, DEFAULT_ENCODING, ENCODING,
    FORMATTER_DELIMITER, FORMATTER_QUOTE_CHARACTER, ORDINAL_COLLISION, TextFormat,
};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use rhi_sluice_core::{
    BindingSet, CancellationToken, CodecError, CollisionPolicy, Component, ComponentCategory,
    ComponentContext, ComponentDecl, ComponentError, ConfigError, EntityData, Message,
    MessageTarget, MessageType, Model, Payload, SettingDefinition, SettingType, TransformInput,
    Value,
};
use std::borrow::Cow;
use std::sync::Arc;

const NULL: &Value = &Value::Null;

#[derive(Debug, Clone)]
struct FormatterConfig {
    format: TextFormat,
    model: Arc<Model>,
    bindings: BindingSet,
}

/// Formats records of the step's input model as delimited lines.
#[derive(Debug, Default)]
pub struct DelimitedFormatter {
    config: Option<FormatterConfig>,
    cancel: CancellationToken,
    records_seen: usize,
    /// Set once an unquoted token that breaks the line format has been logged.
    warned_unquoted: bool,
}

impl Component for DelimitedFormatter {
    fn decl(&self) -> &ComponentDecl {
        static DECL: std::sync::OnceLock<ComponentDecl> = std::sync::OnceLock::new();
        DECL.get_or_init(|| {
            ComponentDecl::new(
                "format-delimited",
                ComponentCategory::Formatter,
                MessageType::Entity,
                MessageType::Text,
            )
            .description("Format records of the input model as delimited text lines")
            .setting(
                SettingDefinition::new(FORMATTER_DELIMITER, "Delimiter", SettingType::Char)
                    .default_value(","),
            )
            .setting(SettingDefinition::new(
                FORMATTER_QUOTE_CHARACTER,
                "Quote character",
                SettingType::Char,
            ))
            .setting(
                SettingDefinition::new(ENCODING, "Encoding", SettingType::Text)
                    .default_value(DEFAULT_ENCODING),
            )
            .setting(
                SettingDefinition::new(
                    ORDINAL_COLLISION,
                    "Attributes sharing an ordinal",
                    SettingType::Choice(vec!["reject".into(), "last_wins".into()]),
                )
                .default_value("last_wins"),
            )
            .attribute_setting(SettingDefinition::new(
                ATTRIBUTE_ORDINAL,
                "Ordinal",
                SettingType::Integer,
            ))
            .attribute_setting(SettingDefinition::new(
                ATTRIBUTE_FORMAT_FUNCTION,
                "Transform",
                SettingType::Text,
            ))
        })
    }

    fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        let settings = ctx.settings();
        let format =
            TextFormat::from_settings(settings, FORMATTER_DELIMITER, FORMATTER_QUOTE_CHARACTER, None)?;
        let policy = match settings.get(ORDINAL_COLLISION) {
            None => CollisionPolicy::LastWins,
            Some(raw) => CollisionPolicy::parse(raw).ok_or_else(|| ConfigError::InvalidSetting {
                name: ORDINAL_COLLISION.to_string(),
                value: raw.to_string(),
                reason: "expected reject or last_wins".into(),
            })?,
        };
        let model = ctx.require_input_model()?;
        let bindings = BindingSet::resolve(
            ctx.attribute_settings(),
            BINDING_KEYS,
            &model,
            &ctx.transforms,
            policy,
        )?;

        tracing::debug!(
            step = ctx.step_id(),
            columns = bindings.len(),
            ?policy,
            "delimited formatter started"
        );
        self.config = Some(FormatterConfig {
            format,
            model,
            bindings,
        });
        self.cancel = ctx.cancel.clone();
        self.records_seen = 0;
        self.warned_unquoted = false;
        Ok(())
    }

    fn handle(
        &mut self,
        message: &Message,
        target: &mut dyn MessageTarget,
        _unit_of_work_boundary: bool,
    ) -> Result<(), ComponentError> {
        let config = self.config.as_ref().ok_or(ComponentError::NotStarted)?;
        let records: &[EntityData] = match message.payload() {
            Payload::Entities(records) => records.as_slice(),
            Payload::Empty => &[],
            other => {
                return Err(ComponentError::UnexpectedPayload {
                    expected: MessageType::Entity,
                    actual: other.message_type(),
                });
            }
        };

        let mut lines = Vec::with_capacity(records.len());
        for record in records {
            self.cancel.check()?;
            self.records_seen += 1;
            lines.push(format_record(
                config,
                record,
                self.records_seen,
                &mut self.warned_unquoted,
            )?);
        }

        target.put(Message::lines(lines).last(message.is_last()))?;
        Ok(())
    }

    fn stop(&mut self) {
        self.config = None;
    }
}

fn format_record(
    config: &FormatterConfig,
    record: &EntityData,
    index: usize,
    warned_unquoted: &mut bool,
) -> Result<Vec<u8>, ComponentError> {
    let mut tokens: Vec<Cow<'_, str>> = Vec::new();
    if config.bindings.is_empty() {
        for (_, attribute) in config.model.attributes() {
            tokens.push(record.get(&attribute.id).map_or(Cow::Borrowed(""), Value::to_token));
        }
    } else {
        for binding in config.bindings.iter() {
            let value = record.get(binding.attribute_id()).unwrap_or(NULL);
            let token = match &binding.transform {
                Some(transform) => {
                    let value = transform.apply(&TransformInput {
                        value,
                        attribute: &binding.attribute,
                        entity: &binding.entity,
                        record,
                    })?;
                    Cow::Owned(value.to_token().into_owned())
                }
                None => value.to_token(),
            };
            tokens.push(token);
        }
    }

    if !*warned_unquoted && tokens.iter().any(|t| breaks_unquoted(&config.format, t)) {
        *warned_unquoted = true;
        tracing::warn!(
            record = index,
            "unquoted value contains the delimiter or a line break; output will not parse back"
        );
    }

    let line = join_tokens(&config.format, &tokens, index)?;
    Ok(config.format.encode(&line, index)?)
}

/// True when `token`, written without quoting, would not survive a parse.
fn breaks_unquoted(format: &TextFormat, token: &str) -> bool {
    format.quote.is_none()
        && token
            .bytes()
            .any(|b| b == format.delimiter || b == b'\r' || b == b'\n')
}

/// Join tokens into one line, without a terminator.
fn join_tokens(format: &TextFormat, tokens: &[Cow<'_, str>], index: usize) -> Result<String, CodecError> {
    // The csv writer emits `""` for a lone empty field; unquoted output keeps it empty.
    let lone_empty = matches!(tokens, [only] if only.is_empty());
    if tokens.is_empty() || (lone_empty && format.quote.is_none()) {
        return Ok(String::new());
    }

    let write_error = |reason: String| CodecError::Write {
        record: index,
        reason,
    };
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .delimiter(format.delimiter)
        .quote(format.quote.unwrap_or(b'"'))
        .quote_style(if format.quote.is_some() {
            QuoteStyle::Always
        } else {
            QuoteStyle::Never
        })
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(tokens.iter().map(|t| t.as_bytes()))
        .map_err(|e| write_error(e.to_string()))?;
    let mut bytes = writer
        .into_inner()
        .map_err(|e| write_error(e.error().to_string()))?;
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|e| write_error(e.to_string()))
}
