//! Delimited text → entity records.

use crate::config::{
    BINDING_KEYS, DELIMITER, ENCODING, HEADER_LINES, QUOTE_CHARACTER, TextFormat,
};
use csv::{ReaderBuilder, StringRecord, Terminator};
use rhi_sluice_core::{
    BindingSet, CancellationToken, CodecError, CollisionPolicy, Component, ComponentCategory,
    ComponentContext, ComponentDecl, ComponentError, EntityData, LogLevel, Message, MessageTarget,
    MessageType, Model, Payload, SettingDefinition, SettingType, TransformInput, Value,
};
use std::sync::Arc;

/// Configuration resolved at start.
#[derive(Debug, Clone)]
struct ParserConfig {
    format: TextFormat,
    header_lines: usize,
    model: Arc<Model>,
    bindings: BindingSet,
}

/// Parses raw lines into records of the step's output model.
///
/// Each line is split into tokens. With bindings, the n-th binding in
/// ascending ordinal order takes the n-th token. Without bindings, tokens map
/// onto the model's attributes in declared order.
#[derive(Debug, Default)]
pub struct DelimitedParser {
    config: Option<ParserConfig>,
    cancel: CancellationToken,
    /// Physical lines seen so far in the stream, header lines included.
    lines_seen: usize,
}

impl Component for DelimitedParser {
    fn decl(&self) -> &ComponentDecl {
        static DECL: std::sync::OnceLock<ComponentDecl> = std::sync::OnceLock::new();
        DECL.get_or_init(|| {
            ComponentDecl::new(
                "parse-delimited",
                ComponentCategory::Parser,
                MessageType::Text,
                MessageType::Entity,
            )
            .description("Parse delimited text lines into records of the output model")
            .setting(
                SettingDefinition::new(DELIMITER, "Delimiter", SettingType::Char).default_value(","),
            )
            .setting(
                SettingDefinition::new(QUOTE_CHARACTER, "Quote character", SettingType::Char)
                    .default_value("\""),
            )
            .setting(
                SettingDefinition::new(ENCODING, "Encoding", SettingType::Text)
                    .default_value(crate::config::DEFAULT_ENCODING),
            )
            .setting(
                SettingDefinition::new(HEADER_LINES, "Header lines to skip", SettingType::Integer)
                    .default_value("0"),
            )
            .attribute_setting(SettingDefinition::new(
                crate::config::ATTRIBUTE_ORDINAL,
                "Ordinal",
                SettingType::Integer,
            ))
            .attribute_setting(SettingDefinition::new(
                crate::config::ATTRIBUTE_FORMAT_FUNCTION,
                "Transform",
                SettingType::Text,
            ))
        })
    }

    fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        let settings = ctx.settings();
        let format = TextFormat::from_settings(settings, DELIMITER, QUOTE_CHARACTER, Some('"'))?;
        let header_lines = settings.usize_or(HEADER_LINES, 0)?;
        let model = ctx.require_output_model()?;
        let bindings = BindingSet::resolve(
            ctx.attribute_settings(),
            BINDING_KEYS,
            &model,
            &ctx.transforms,
            CollisionPolicy::Reject,
        )?;

        if bindings.is_empty() {
            ctx.log(
                LogLevel::Warn,
                format!(
                    "no attribute ordinals configured; mapping tokens to the {} attributes of model '{}' in declared order",
                    model.attributes().count(),
                    model.id
                ),
            );
        }
        tracing::debug!(
            step = ctx.step_id(),
            bindings = bindings.len(),
            encoding = format.encoding.name(),
            "delimited parser started"
        );

        self.config = Some(ParserConfig {
            format,
            header_lines,
            model,
            bindings,
        });
        self.cancel = ctx.cancel.clone();
        self.lines_seen = 0;
        Ok(())
    }

    fn handle(
        &mut self,
        message: &Message,
        target: &mut dyn MessageTarget,
        _unit_of_work_boundary: bool,
    ) -> Result<(), ComponentError> {
        let config = self.config.as_ref().ok_or(ComponentError::NotStarted)?;
        let lines: &[Vec<u8>] = match message.payload() {
            Payload::Lines(lines) => lines.as_slice(),
            Payload::Empty => &[],
            other => {
                return Err(ComponentError::UnexpectedPayload {
                    expected: MessageType::Text,
                    actual: other.message_type(),
                });
            }
        };

        let mut records = Vec::with_capacity(lines.len());
        for raw in lines {
            self.cancel.check()?;
            self.lines_seen += 1;
            if self.lines_seen <= config.header_lines {
                continue;
            }
            if let Some(record) = parse_line(config, raw, self.lines_seen)? {
                records.push(record);
            }
        }

        target.put(Message::entities(records).last(message.is_last()))?;
        Ok(())
    }

    fn stop(&mut self) {
        self.config = None;
    }
}

/// Parse one physical line. Empty lines yield `None`; whitespace is data.
fn parse_line(
    config: &ParserConfig,
    raw: &[u8],
    line: usize,
) -> Result<Option<EntityData>, ComponentError> {
    let decoded = config.format.decode(raw, line)?;
    let text = decoded.strip_suffix('\r').unwrap_or(&decoded);
    if text.is_empty() {
        return Ok(None);
    }
    let tokens = tokenize(&config.format, text, line)?;

    let mut record = EntityData::new();
    if config.bindings.is_empty() {
        for ((_, attribute), token) in config.model.attributes().zip(tokens.iter()) {
            record.put(attribute.id.clone(), token_value(token));
        }
        return Ok(Some(record));
    }

    for (binding, token) in config.bindings.iter().zip(tokens.iter()) {
        let mut value = token_value(token);
        if let Some(transform) = &binding.transform {
            value = transform.apply(&TransformInput {
                value: &value,
                attribute: &binding.attribute,
                entity: &binding.entity,
                record: &record,
            })?;
        }
        record.put(binding.attribute.id.clone(), value);
    }
    Ok(Some(record))
}

fn token_value(token: &str) -> Value {
    if token.is_empty() {
        Value::Null
    } else {
        Value::String(token.to_string())
    }
}

/// Split a decoded line into tokens, honouring the quote character.
///
/// A bare `\r` inside the line is field data. An unquoted `\n` would start a
/// second record and is rejected.
fn tokenize(format: &TextFormat, text: &str, line: usize) -> Result<StringRecord, CodecError> {
    if let Some(quote) = format.quote {
        // A closed quoted field always holds an even number of quote bytes.
        if text.bytes().filter(|b| *b == quote).count() % 2 != 0 {
            return Err(CodecError::Malformed {
                line,
                reason: "unbalanced quote".into(),
            });
        }
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter)
        .quoting(format.quote.is_some())
        .quote(format.quote.unwrap_or(b'"'))
        .terminator(Terminator::Any(b'\n'))
        .from_reader(text.as_bytes());
    let malformed = |e: csv::Error| CodecError::Malformed {
        line,
        reason: e.to_string(),
    };
    let mut record = StringRecord::new();
    reader.read_record(&mut record).map_err(malformed)?;
    if reader.read_record(&mut StringRecord::new()).map_err(malformed)? {
        return Err(CodecError::Malformed {
            line,
            reason: "more than one record on the line".into(),
        });
    }
    Ok(record)
}
