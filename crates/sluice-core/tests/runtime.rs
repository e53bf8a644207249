use rhi_sluice_core::{
    CancellationToken, Component, ComponentCategory, ComponentContext, ComponentDecl,
    ComponentError, ComponentRegistry, ConfigError, ExecutionStatus, Flow, FlowError, FlowRuntime,
    FlowStep, MemoryExecutionStore, Message, MessageTarget, MessageType, RoutingError,
    content_settings,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Behavior {
    /// Forward every message unchanged.
    Forward,
    /// Forward payloads but never set the last flag.
    ForgetLast,
    /// Fail in `start`.
    FailStart,
    /// Block in `handle` until cancelled.
    Block,
    /// Put twice on the last message.
    PutAfterLast,
}

#[derive(Default)]
struct Recorder {
    stopped: AtomicUsize,
    seen_last: AtomicUsize,
    received: Mutex<Vec<(String, u64, bool)>>,
}

struct TestComponent {
    decl: ComponentDecl,
    behavior: Behavior,
    recorder: Arc<Recorder>,
    cancel: CancellationToken,
}

impl Component for TestComponent {
    fn decl(&self) -> &ComponentDecl {
        &self.decl
    }

    fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.cancel = ctx.cancel.clone();
        match self.behavior {
            Behavior::FailStart => Err(ConfigError::MissingSetting("everything".into()).into()),
            _ => Ok(()),
        }
    }

    fn handle(
        &mut self,
        message: &Message,
        target: &mut dyn MessageTarget,
        _unit_of_work_boundary: bool,
    ) -> Result<(), ComponentError> {
        self.recorder.received.lock().unwrap().push((
            message.origin_id().to_string(),
            message.sequence_number(),
            message.is_last(),
        ));
        if message.is_last() {
            self.recorder.seen_last.fetch_add(1, Ordering::SeqCst);
        }

        let forwarded = Message::new(message.payload().clone());
        match self.behavior {
            Behavior::Forward => target.put(forwarded.last(message.is_last()))?,
            Behavior::ForgetLast => target.put(forwarded)?,
            Behavior::Block => loop {
                self.cancel.check()?;
                thread::sleep(Duration::from_millis(5));
            },
            Behavior::PutAfterLast => {
                target.put(forwarded.clone().last(message.is_last()))?;
                if message.is_last() {
                    target.put(forwarded)?;
                }
            }
            Behavior::FailStart => {}
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.recorder.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

fn registry(recorder: &Arc<Recorder>) -> ComponentRegistry {
    let mut registry = ComponentRegistry::with_builtins();
    for (name, behavior) in [
        ("forward", Behavior::Forward),
        ("forget-last", Behavior::ForgetLast),
        ("fail-start", Behavior::FailStart),
        ("block", Behavior::Block),
        ("put-after-last", Behavior::PutAfterLast),
    ] {
        let decl = ComponentDecl::new(name, ComponentCategory::Transformer, MessageType::Any, MessageType::Any);
        let recorder = Arc::clone(recorder);
        let factory_decl = decl.clone();
        registry.register_factory(decl, move || {
            Box::new(TestComponent {
                decl: factory_decl.clone(),
                behavior,
                recorder: Arc::clone(&recorder),
                cancel: CancellationToken::new(),
            })
        });
    }
    registry
}

fn source(id: &str, content: &str) -> FlowStep {
    FlowStep::new(id, "content")
        .setting(content_settings::CONTENT, content)
        .setting(content_settings::ROWS_PER_MESSAGE, "1")
}

fn runtime(recorder: &Arc<Recorder>) -> FlowRuntime {
    FlowRuntime::new(registry(recorder)).with_poll_interval(Duration::from_millis(5))
}

#[test]
fn test_linear_flow_propagates_last_once() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f")
        .step(source("src", "a\nb\nc"))
        .step(FlowStep::new("fwd", "forward"))
        .link("src", "fwd");

    let outcome = runtime(&recorder).execute(&flow, "x1").unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Done);
    let out = outcome.output("fwd");
    assert_eq!(out.len(), 3);
    assert_eq!(out.iter().filter(|m| m.is_last()).count(), 1);
    assert!(out[2].is_last());
    let seqs: Vec<u64> = out.iter().map(|m| m.sequence_number()).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(out[1].text_lines(), vec!["b"]);

    let received = recorder.received.lock().unwrap();
    assert!(received.iter().all(|(origin, _, _)| origin == "src"));
    assert_eq!(outcome.statistics["fwd"].inbound_messages, 3);
    assert_eq!(outcome.statistics["src"].outbound_items, 3);
}

#[test]
fn test_fan_in_sees_last_once_after_all_edges() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f")
        .step(source("a", "a1\na2\na3"))
        .step(source("b", "b1\nb2"))
        .step(FlowStep::new("merge", "forward"))
        .link("a", "merge")
        .link("b", "merge");

    let outcome = runtime(&recorder).execute(&flow, "x1").unwrap();

    let received = recorder.received.lock().unwrap();
    assert_eq!(received.len(), 5);
    assert_eq!(recorder.seen_last.load(Ordering::SeqCst), 1);
    assert!(received.last().unwrap().2);

    for edge in ["a", "b"] {
        let seqs: Vec<u64> = received
            .iter()
            .filter(|(origin, _, _)| origin == edge)
            .map(|(_, seq, _)| *seq)
            .collect();
        let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
        assert_eq!(seqs, expected);
    }

    let out = outcome.output("merge");
    assert_eq!(out.len(), 5);
    assert!(out[4].is_last());
    assert!(out[..4].iter().all(|m| !m.is_last()));
}

#[test]
fn test_fan_out_delivers_to_every_link() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f")
        .step(source("src", "x\ny"))
        .step(FlowStep::new("left", "forward"))
        .step(FlowStep::new("right", "forward"))
        .link("src", "left")
        .link("src", "right");

    let outcome = runtime(&recorder).execute(&flow, "x1").unwrap();

    for step in ["left", "right"] {
        let lines: Vec<String> = outcome
            .output(step)
            .iter()
            .flat_map(|m| m.text_lines())
            .collect();
        assert_eq!(lines, vec!["x", "y"]);
    }
    assert_eq!(recorder.seen_last.load(Ordering::SeqCst), 2);
}

#[test]
fn test_missing_last_is_supplied() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f")
        .step(source("src", "x"))
        .step(FlowStep::new("lossy", "forget-last"))
        .link("src", "lossy");

    let outcome = runtime(&recorder).execute(&flow, "x1").unwrap();

    let out = outcome.output("lossy");
    assert_eq!(out.len(), 2);
    assert!(!out[0].is_last());
    assert!(out[1].is_last());
    assert!(out[1].payload().is_empty());
}

#[test]
fn test_put_after_last_fails_flow() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f")
        .step(source("src", "x"))
        .step(FlowStep::new("bad", "put-after-last"))
        .link("src", "bad");

    let err = runtime(&recorder).execute(&flow, "x1").unwrap_err();

    assert!(matches!(
        err,
        FlowError::StepFailed {
            ref step,
            source: ComponentError::Routing(_)
        } if step == "bad"
    ));
}

#[test]
fn test_required_target_missing() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f")
        .step(source("src", "x"))
        .step(FlowStep::new("fwd", "forward").require_target())
        .link("src", "fwd");

    let err = runtime(&recorder).execute(&flow, "x1").unwrap_err();

    assert!(matches!(
        err,
        FlowError::StepFailed {
            source: ComponentError::Routing(RoutingError::NoTarget(_)),
            ..
        }
    ));
}

#[test]
fn test_stop_called_after_failed_start() {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(MemoryExecutionStore::new());
    let flow = Flow::new("f")
        .step(source("src", "x"))
        .step(FlowStep::new("broken", "fail-start"))
        .step(FlowStep::new("sink", "forward"))
        .link("src", "broken")
        .link("broken", "sink");

    let err = runtime(&recorder)
        .with_tracker(store.clone())
        .execute(&flow, "x1")
        .unwrap_err();

    match err {
        FlowError::StepFailed { step, source } => {
            assert_eq!(step, "broken");
            assert!(source.is_configuration());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 2);

    let record = store.execution("x1").unwrap();
    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.cause.unwrap().contains("broken"));
    let broken = store
        .steps("x1")
        .into_iter()
        .find(|s| s.step_id == "broken")
        .unwrap();
    assert_eq!(broken.status, ExecutionStatus::Error);
}

#[test]
fn test_failed_execution_does_not_poison_runtime() {
    let recorder = Arc::new(Recorder::default());
    let runtime = runtime(&recorder);
    let broken = Flow::new("f")
        .step(source("src", "x"))
        .step(FlowStep::new("broken", "fail-start"))
        .link("src", "broken");
    let healthy = Flow::new("g")
        .step(source("src", "x"))
        .step(FlowStep::new("fwd", "forward"))
        .link("src", "fwd");

    assert!(runtime.execute(&broken, "x1").is_err());
    let outcome = runtime.execute(&healthy, "x2").unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Done);
    assert!(!runtime.cancellation_token().is_cancelled());
}

#[test]
fn test_cancellation_stops_every_component() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f")
        .step(source("src", "x"))
        .step(FlowStep::new("stuck", "block"))
        .step(FlowStep::new("sink", "forward"))
        .link("src", "stuck")
        .link("stuck", "sink");

    let runtime = runtime(&recorder);
    let token = runtime.cancellation_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        token.cancel();
    });

    let err = runtime.execute(&flow, "x1").unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, FlowError::Cancelled));
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 2);
}

#[test]
fn test_successful_execution_is_tracked() {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(MemoryExecutionStore::new());
    let flow = Flow::new("f")
        .step(source("src", "x\ny"))
        .step(FlowStep::new("fwd", "forward"))
        .link("src", "fwd");

    runtime(&recorder)
        .with_tracker(store.clone())
        .execute(&flow, "x1")
        .unwrap();

    assert_eq!(store.execution("x1").unwrap().status, ExecutionStatus::Done);
    let steps = store.steps("x1");
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s.status == ExecutionStatus::Done));
    let fwd = steps.iter().find(|s| s.step_id == "fwd").unwrap();
    assert_eq!(fwd.statistics.inbound_items, 2);
}

#[test]
fn test_invalid_flow_rejected_before_running() {
    let recorder = Arc::new(Recorder::default());
    let flow = Flow::new("f").step(FlowStep::new("x", "unknown"));

    assert!(matches!(
        runtime(&recorder).execute(&flow, "x1"),
        Err(FlowError::UnknownComponentType { .. })
    ));
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 0);
}
