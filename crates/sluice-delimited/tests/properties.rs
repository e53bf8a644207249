use proptest::prelude::*;
use rhi_sluice_core::{
    CollectingTarget, Component, ComponentContext, Entity, EntityData, FlowStep, Message, Model,
    Value, run_component,
};
use rhi_sluice_delimited::{
    ATTRIBUTE_ORDINAL, DELIMITER, DelimitedFormatter, DelimitedParser, FORMATTER_DELIMITER,
    FORMATTER_QUOTE_CHARACTER, QUOTE_CHARACTER,
};

const ATTRIBUTES: [&str; 4] = ["a1", "a2", "b1", "b2"];

fn model() -> Model {
    Model::new("m")
        .entity(Entity::new("a", "A").attribute("a1", "One").attribute("a2", "Two"))
        .entity(Entity::new("b", "B").attribute("b1", "One").attribute("b2", "Two"))
}

fn bind(mut step: FlowStep, ordinals: &[usize]) -> FlowStep {
    for (attribute, ordinal) in ATTRIBUTES.iter().zip(ordinals) {
        step = step.attribute_setting(*attribute, ATTRIBUTE_ORDINAL, ordinal.to_string());
    }
    step
}

fn run(component: &mut dyn Component, ctx: &ComponentContext, message: Message) -> Vec<Message> {
    let mut target = CollectingTarget::new(ctx.step_id());
    run_component(component, ctx, vec![message.last(true)], &mut target).unwrap();
    target.into_messages()
}

fn value() -> impl Strategy<Value = Value> {
    prop::option::of(prop_oneof!["[^\r\n]{1,12}", "[ \t]{1,4}"]).prop_map(Value::from)
}

/// Values that survive unquoted output: no delimiter, no line breaks.
fn unquoted_value(delimiter: char) -> impl Strategy<Value = Value> {
    prop::option::of(
        prop_oneof!["[^\r\n]{1,12}", "[ \t]{1,4}"]
            .prop_filter("holds the delimiter", move |s: &String| !s.contains(delimiter)),
    )
    .prop_map(Value::from)
}

fn record_of(values: &[Value]) -> EntityData {
    ATTRIBUTES
        .iter()
        .zip(values)
        .fold(EntityData::new(), |record, (attribute, value)| record.with(*attribute, value.clone()))
}

fn format_then_parse(
    format_step: FlowStep,
    parse_step: FlowStep,
    record: &EntityData,
) -> (Vec<String>, Vec<EntityData>) {
    let format_ctx = ComponentContext::new("p1", format_step).with_input_model(model());
    let formatted = run(
        &mut DelimitedFormatter::default(),
        &format_ctx,
        Message::entities(vec![record.clone()]),
    );
    let parse_ctx = ComponentContext::new("p1", parse_step).with_output_model(model());
    let parsed = run(&mut DelimitedParser::default(), &parse_ctx, formatted[0].clone());
    let records = parsed[0].payload().as_entities().unwrap_or_default().to_vec();
    (formatted[0].text_lines(), records)
}

proptest! {
    #[test]
    fn format_then_parse_is_identity(
        values in prop::collection::vec(value(), 4),
        ordinals in prop::collection::hash_set(0_usize..500, 4),
        delimiter in prop::sample::select(vec![",", "|", ";", "\t", " "]),
    ) {
        let ordinals: Vec<usize> = ordinals.into_iter().collect();
        let record = record_of(&values);

        let (_, parsed) = format_then_parse(
            bind(
                FlowStep::new("format", "format-delimited")
                    .setting(FORMATTER_DELIMITER, delimiter)
                    .setting(FORMATTER_QUOTE_CHARACTER, "\""),
                &ordinals,
            ),
            bind(FlowStep::new("parse", "parse-delimited").setting(DELIMITER, delimiter), &ordinals),
            &record,
        );

        prop_assert_eq!(parsed, vec![record]);
    }

    #[test]
    fn unquoted_format_then_parse_is_identity(
        (delimiter, values) in prop::sample::select(vec![',', '|', ';', '\t', ' '])
            .prop_flat_map(|d| (Just(d), prop::collection::vec(unquoted_value(d), 1..=4))),
        ordinals in prop::collection::hash_set(0_usize..500, 4),
    ) {
        // A lone null token is an empty line, which the parser skips.
        prop_assume!(!(values.len() == 1 && values[0].is_null()));
        let ordinals: Vec<usize> = ordinals.into_iter().take(values.len()).collect();
        let record = record_of(&values);
        let delimiter = delimiter.to_string();

        let (lines, parsed) = format_then_parse(
            bind(
                FlowStep::new("format", "format-delimited").setting(FORMATTER_DELIMITER, delimiter.as_str()),
                &ordinals,
            ),
            bind(
                FlowStep::new("parse", "parse-delimited")
                    .setting(DELIMITER, delimiter.as_str())
                    .setting(QUOTE_CHARACTER, ""),
                &ordinals,
            ),
            &record,
        );

        prop_assert_eq!(parsed, vec![record], "line {:?}", lines);
    }

    #[test]
    fn tokens_follow_ascending_ordinals(ordinals in prop::collection::hash_set(0_usize..500, 4)) {
        let ordinals: Vec<usize> = ordinals.into_iter().collect();
        let record = ATTRIBUTES
            .iter()
            .fold(EntityData::new(), |record, attribute| record.with(*attribute, *attribute));

        let step = bind(FlowStep::new("format", "format-delimited"), &ordinals);
        let ctx = ComponentContext::new("p2", step).with_input_model(model());
        let formatted = run(&mut DelimitedFormatter::default(), &ctx, Message::entities(vec![record]));

        let mut expected: Vec<(usize, &str)> = ordinals.iter().copied().zip(ATTRIBUTES).collect();
        expected.sort();
        let expected: Vec<&str> = expected.into_iter().map(|(_, attribute)| attribute).collect();
        prop_assert_eq!(formatted[0].text_lines(), vec![expected.join(",")]);
    }
}
