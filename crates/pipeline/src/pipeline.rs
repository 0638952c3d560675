//! Pipeline assembly and runtime
//!
//! A [`Pipeline`] is a validated, fixed-order list of stages. Turning it into
//! a [`PipelineTask`] wires one FIFO channel per stage:
//!
//! ```text
//! queue() -> [stage 0] -> [stage 1] -> ... -> [stage n-1] -> drain
//! ```
//!
//! Every sink in a task shares one [`CancelGate`]. `cancel()` closes the gate
//! before stopping anything, then stops stages from the tail towards the head,
//! so a stage can never write into a stage that has already stopped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use voice_bridge_config::{constants, PipelineConfig};
use voice_bridge_core::{
    CancelGate, ControlSignal, Error, Frame, FrameProcessor, FrameSink, InterruptSignal,
    ProcessorContext, Result, StageError, StageRole, TeardownError,
};

use crate::PipelineError;

/// Validated, ordered stage list
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn FrameProcessor>>,
    channel_capacity: usize,
    stop_timeout: Duration,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in pipeline order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Wire the channels for one session
    pub fn into_task(self, session_id: impl Into<String>) -> PipelineTask {
        PipelineTask::new(self, session_id.into())
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn FrameProcessor>>,
    channel_capacity: usize,
    stop_timeout: Duration,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            channel_capacity: constants::pipeline::CHANNEL_CAPACITY,
            stop_timeout: Duration::from_millis(constants::pipeline::STOP_TIMEOUT_MS),
        }
    }

    /// Append a stage
    pub fn stage<P: FrameProcessor>(mut self, stage: P) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a shared stage
    pub fn stage_arc(mut self, stage: Arc<dyn FrameProcessor>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Upper bound on each stage's stop during cancellation
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Apply channel capacity and stop timeout from settings
    pub fn with_config(self, config: &PipelineConfig) -> Self {
        self.channel_capacity(config.channel_capacity)
            .stop_timeout(Duration::from_millis(config.stop_timeout_ms))
    }

    pub fn build(self) -> std::result::Result<Pipeline, PipelineError> {
        if self.channel_capacity == 0 {
            return Err(PipelineError::Assembly(
                "channel capacity must be positive".into(),
            ));
        }
        let roles: Vec<StageRole> = self.stages.iter().map(|s| s.role()).collect();
        validate_roles(&roles)?;

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            channel_capacity: self.channel_capacity,
            stop_timeout: self.stop_timeout,
        })
    }
}

/// Audio input first, one audio output, only context sinks after it
fn validate_roles(roles: &[StageRole]) -> std::result::Result<(), PipelineError> {
    let assembly = |msg: &str| Err(PipelineError::Assembly(msg.to_string()));

    if roles.first() != Some(&StageRole::AudioInput) {
        return assembly("first stage must be the audio input");
    }
    if roles.iter().filter(|r| **r == StageRole::AudioInput).count() != 1 {
        return assembly("pipeline must have exactly one audio input");
    }
    let outputs: Vec<usize> = roles
        .iter()
        .enumerate()
        .filter(|(_, r)| **r == StageRole::AudioOutput)
        .map(|(i, _)| i)
        .collect();
    let output = match outputs.as_slice() {
        [index] => *index,
        _ => return assembly("pipeline must have exactly one audio output"),
    };
    if roles[..output].contains(&StageRole::ContextSink) {
        return assembly("context sinks must follow the audio output");
    }
    if roles[output + 1..].iter().any(|r| *r != StageRole::ContextSink) {
        return assembly("only context sinks may follow the audio output");
    }
    Ok(())
}

/// Receiving ends, consumed by the first `run()`
struct Wiring {
    inputs: Vec<mpsc::Receiver<Frame>>,
    stops: Vec<watch::Receiver<bool>>,
    output: mpsc::Receiver<Frame>,
    errors: mpsc::UnboundedReceiver<StageError>,
}

/// Running instance of a pipeline for one session
pub struct PipelineTask {
    name: String,
    session_id: String,
    stages: Vec<Arc<dyn FrameProcessor>>,
    contexts: Vec<ProcessorContext>,
    gate: CancelGate,
    interrupts: InterruptSignal,
    head: FrameSink,
    wiring: Mutex<Option<Wiring>>,
    stop_signals: Vec<watch::Sender<bool>>,
    handles: Mutex<Vec<Option<JoinHandle<()>>>>,
    /// Serializes startup against teardown
    lifecycle: tokio::sync::Mutex<()>,
    /// Stages whose `on_start` has been called
    started: AtomicUsize,
    stop_order: Mutex<Vec<&'static str>>,
    stopped: watch::Sender<bool>,
    stop_timeout: Duration,
}

impl PipelineTask {
    fn new(pipeline: Pipeline, session_id: String) -> Self {
        let gate = CancelGate::new();
        let interrupts = InterruptSignal::new();
        let capacity = pipeline.channel_capacity;
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(capacity);

        let mut senders = Vec::with_capacity(pipeline.stages.len());
        let mut inputs = Vec::with_capacity(pipeline.stages.len());
        let mut stop_signals = Vec::with_capacity(pipeline.stages.len());
        let mut stops = Vec::with_capacity(pipeline.stages.len());
        for _ in &pipeline.stages {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            inputs.push(rx);
            let (stop_tx, stop_rx) = watch::channel(false);
            stop_signals.push(stop_tx);
            stops.push(stop_rx);
        }

        let contexts = pipeline
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let downstream = senders.get(i + 1).cloned().unwrap_or_else(|| output_tx.clone());
                ProcessorContext::new(
                    session_id.clone(),
                    stage.name(),
                    FrameSink::new(downstream, gate.clone()),
                    FrameSink::new(senders[i].clone(), gate.clone()),
                    errors_tx.clone(),
                )
                .with_interrupts(interrupts.clone())
            })
            .collect();

        // An empty pipeline never passes the builder, but keep the head valid anyway
        let head_tx = senders.first().cloned().unwrap_or(output_tx);
        let (stopped, _) = watch::channel(false);

        Self {
            name: pipeline.name,
            session_id,
            contexts,
            gate: gate.clone(),
            interrupts,
            head: FrameSink::new(head_tx, gate),
            wiring: Mutex::new(Some(Wiring {
                inputs,
                stops,
                output: output_rx,
                errors: errors_rx,
            })),
            handles: Mutex::new(Vec::new()),
            stop_signals,
            lifecycle: tokio::sync::Mutex::new(()),
            started: AtomicUsize::new(0),
            stop_order: Mutex::new(Vec::new()),
            stopped,
            stop_timeout: pipeline.stop_timeout,
            stages: pipeline.stages,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether cancellation has begun
    pub fn is_cancelled(&self) -> bool {
        self.gate.is_closed()
    }

    /// Stage names in the order they were stopped
    pub fn stop_order(&self) -> Vec<&'static str> {
        self.stop_order.lock().clone()
    }

    /// Inject a frame at the head; a no-op once cancellation has begun
    ///
    /// An injected `Interruption` is raised pipeline-wide before it is sent,
    /// like one detected by a stage.
    pub async fn queue(&self, frame: Frame) -> Result<()> {
        if matches!(frame, Frame::Control(ControlSignal::Interruption)) && !self.gate.is_closed() {
            self.interrupts.raise();
        }
        match self.head.send(frame).await {
            Err(e) if e.is_cancellation() && self.gate.is_closed() => {
                tracing::trace!(session_id = %self.session_id, "Frame queued after cancel, ignored");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn queue_frames(&self, frames: impl IntoIterator<Item = Frame>) -> Result<()> {
        for frame in frames {
            self.queue(frame).await?;
        }
        Ok(())
    }

    /// Start every stage and forward frames until the pipeline drains
    ///
    /// Returns after an `EndOfSession` frame has passed the last stage, after
    /// `cancel()` completes, or with `Error::Stage` once a stage failure has
    /// torn the pipeline down.
    pub async fn run(&self) -> Result<()> {
        let wiring = self.wiring.lock().take();
        let Some(Wiring {
            inputs,
            stops,
            mut output,
            mut errors,
        }) = wiring
        else {
            return Err(PipelineError::Assembly("pipeline task already started".into()).into());
        };

        if let Err(e) = self.start(inputs, stops).await {
            self.cancel().await;
            return Err(e);
        }
        if self.gate.is_closed() {
            self.wait_stopped().await;
            return Ok(());
        }
        tracing::info!(
            session_id = %self.session_id,
            pipeline = %self.name,
            stages = self.stages.len(),
            "Pipeline running"
        );

        enum Outcome {
            Drained,
            Cancelled,
            Failed(StageError),
        }

        let outcome = loop {
            tokio::select! {
                _ = self.wait_stopped() => break Outcome::Cancelled,
                Some(err) = errors.recv() => break Outcome::Failed(err),
                frame = output.recv() => match frame {
                    Some(frame) if frame.is_end_of_session() => break Outcome::Drained,
                    Some(frame) => {
                        tracing::trace!(session_id = %self.session_id, kind = frame.kind(), "Frame left pipeline");
                    }
                    None => break Outcome::Drained,
                },
            }
        };

        match outcome {
            Outcome::Drained => {
                tracing::debug!(session_id = %self.session_id, "Pipeline drained");
                self.cancel().await;
                Ok(())
            }
            Outcome::Cancelled => Ok(()),
            Outcome::Failed(err) => {
                metrics::counter!("voice_bridge_stage_errors_total", "stage" => err.stage_name.clone())
                    .increment(1);
                tracing::error!(
                    session_id = %self.session_id,
                    stage = %err.stage_name,
                    error = %err.cause,
                    "Stage failed, tearing down pipeline"
                );
                self.cancel().await;
                Err(Error::Stage(err))
            }
        }
    }

    async fn start(
        &self,
        inputs: Vec<mpsc::Receiver<Frame>>,
        stops: Vec<watch::Receiver<bool>>,
    ) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.gate.is_closed() {
            return Ok(());
        }

        for (i, stage) in self.stages.iter().enumerate() {
            self.started.store(i + 1, Ordering::SeqCst);
            if let Err(e) = stage.on_start(&self.contexts[i]).await {
                return Err(StageError::new(stage.name(), e).into());
            }
        }

        let mut handles = self.handles.lock();
        for ((stage, ctx), (rx, stop)) in self
            .stages
            .iter()
            .zip(&self.contexts)
            .zip(inputs.into_iter().zip(stops))
        {
            handles.push(Some(tokio::spawn(run_stage(
                Arc::clone(stage),
                ctx.clone(),
                rx,
                stop,
            ))));
        }
        Ok(())
    }

    /// Stop every stage, tail first
    ///
    /// Teardown failures are logged and never stop the remaining stages from
    /// being torn down. Concurrent callers wait for the first to finish.
    pub async fn cancel(&self) {
        if !self.gate.close() {
            self.wait_stopped().await;
            return;
        }
        tracing::debug!(session_id = %self.session_id, pipeline = %self.name, "Cancelling pipeline");

        let _lifecycle = self.lifecycle.lock().await;
        let mut handles = std::mem::take(&mut *self.handles.lock());
        let started = self.started.load(Ordering::SeqCst);

        for i in (0..self.stages.len()).rev() {
            let stage = &self.stages[i];
            let name = stage.name();
            self.stop_signals[i].send_replace(true);

            if let Some(handle) = handles.get_mut(i).and_then(Option::take) {
                let abort = handle.abort_handle();
                match tokio::time::timeout(self.stop_timeout, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.is_cancelled() => {}
                    Ok(Err(e)) => self.log_teardown(TeardownError::new(name, e)),
                    Err(_) => {
                        abort.abort();
                        self.log_teardown(TeardownError::new(name, "stage loop did not exit in time"));
                    }
                }
            }

            if i < started {
                match tokio::time::timeout(self.stop_timeout, stage.on_stop(&self.contexts[i])).await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => self.log_teardown(TeardownError::new(name, e)),
                    Err(_) => self.log_teardown(TeardownError::new(name, "on_stop timed out")),
                }
            }

            self.stop_order.lock().push(name);
        }

        self.stopped.send_replace(true);
        tracing::debug!(session_id = %self.session_id, "Pipeline stopped");
    }

    fn log_teardown(&self, err: TeardownError) {
        tracing::warn!(
            session_id = %self.session_id,
            stage = %err.stage_name,
            error = %err,
            "Teardown error"
        );
    }

    async fn wait_stopped(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Resolves once the stop flag is set or its sender is gone
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_stage(
    stage: Arc<dyn FrameProcessor>,
    ctx: ProcessorContext,
    mut rx: mpsc::Receiver<Frame>,
    mut stop: watch::Receiver<bool>,
) {
    let name = stage.name();

    loop {
        let frame = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let end = frame.is_end_of_session();
        let result = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            result = stage.process(frame, &ctx) => result,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_cancellation() && ctx.is_cancelled() => break,
            Err(e) => {
                ctx.report_error(e);
                break;
            }
        }

        if end {
            // The stage has drained; pass the terminal frame on
            let terminal = Frame::Control(ControlSignal::EndOfSession);
            if let Err(e) = ctx.push(terminal).await {
                tracing::trace!(session_id = %ctx.session_id, stage = name, error = %e, "End of session not forwarded");
            }
            break;
        }
    }

    tracing::debug!(session_id = %ctx.session_id, stage = name, "Stage loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Passthrough;
    use async_trait::async_trait;

    fn text(t: &str) -> Frame {
        Frame::GeneratedText { text: t.into() }
    }

    struct Failing;

    #[async_trait]
    impl FrameProcessor for Failing {
        async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
            match frame {
                Frame::GeneratedText { .. } => Err(Error::Provider("upstream returned 500".into())),
                Frame::Control(ControlSignal::EndOfSession) => Ok(()),
                other => ctx.push(other).await,
            }
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct HangingStop;

    #[async_trait]
    impl FrameProcessor for HangingStop {
        async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
            if frame.is_end_of_session() {
                return Ok(());
            }
            ctx.push(frame).await
        }

        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn on_stop(&self, _ctx: &ProcessorContext) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn standard() -> (Pipeline, Arc<Passthrough>) {
        let sink = Arc::new(Passthrough::new("assistant_sink", StageRole::ContextSink));
        let pipeline = Pipeline::builder("test")
            .stage(Passthrough::new("input", StageRole::AudioInput))
            .stage(Passthrough::new("middle", StageRole::Processor))
            .stage(Passthrough::new("output", StageRole::AudioOutput))
            .stage_arc(sink.clone())
            .build()
            .unwrap();
        (pipeline, sink)
    }

    fn roles_ok(roles: &[StageRole]) -> bool {
        validate_roles(roles).is_ok()
    }

    #[test]
    fn test_role_validation() {
        use StageRole::*;

        assert!(roles_ok(&[AudioInput, Processor, AudioOutput]));
        assert!(roles_ok(&[AudioInput, Processor, AudioOutput, ContextSink]));
        assert!(!roles_ok(&[]));
        assert!(!roles_ok(&[Processor, AudioInput, AudioOutput]));
        assert!(!roles_ok(&[AudioInput, AudioInput, AudioOutput]));
        assert!(!roles_ok(&[AudioInput, Processor]));
        assert!(!roles_ok(&[AudioInput, AudioOutput, AudioOutput]));
        assert!(!roles_ok(&[AudioInput, AudioOutput, Processor]));
        assert!(!roles_ok(&[AudioInput, ContextSink, AudioOutput]));
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = Pipeline::builder("test")
            .stage(Passthrough::new("input", StageRole::AudioInput))
            .stage(Passthrough::new("output", StageRole::AudioOutput))
            .channel_capacity(0)
            .build();
        assert!(matches!(result, Err(PipelineError::Assembly(_))));
    }

    #[tokio::test]
    async fn test_end_of_session_drains_in_order() {
        let (pipeline, sink) = standard();
        let task = Arc::new(pipeline.into_task("CA1"));

        task.queue_frames([text("a"), text("b"), text("c")]).await.unwrap();
        task.queue(Frame::Control(ControlSignal::EndOfSession)).await.unwrap();
        task.run().await.unwrap();

        let seen: Vec<String> = sink
            .seen()
            .into_iter()
            .filter_map(|f| match f {
                Frame::GeneratedText { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_stops_in_reverse_order() {
        let (pipeline, _sink) = standard();
        let names = pipeline.stage_names();
        let task = Arc::new(pipeline.into_task("CA2"));

        let runner = tokio::spawn({
            let task = Arc::clone(&task);
            async move { task.run().await }
        });
        task.queue(text("hello")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        task.cancel().await;
        runner.await.unwrap().unwrap();

        let mut expected = names;
        expected.reverse();
        assert_eq!(task.stop_order(), expected);
    }

    #[tokio::test]
    async fn test_queue_after_cancel_is_noop() {
        let (pipeline, sink) = standard();
        let task = Arc::new(pipeline.into_task("CA3"));

        task.cancel().await;
        task.queue(text("late")).await.unwrap();
        // Running a cancelled task returns immediately
        task.run().await.unwrap();
        assert!(sink.seen().is_empty());
        // Concurrent cancels are harmless
        task.cancel().await;
    }

    #[tokio::test]
    async fn test_stage_error_is_session_fatal() {
        let pipeline = Pipeline::builder("test")
            .stage(Passthrough::new("input", StageRole::AudioInput))
            .stage(Failing)
            .stage(Passthrough::new("output", StageRole::AudioOutput))
            .build()
            .unwrap();
        let task = Arc::new(pipeline.into_task("CA4"));

        task.queue(text("boom")).await.unwrap();
        match task.run().await {
            Err(Error::Stage(e)) => assert_eq!(e.stage_name, "failing"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(task.stop_order(), vec!["output", "failing", "input"]);
    }

    #[tokio::test]
    async fn test_hanging_stop_does_not_block_teardown() {
        let pipeline = Pipeline::builder("test")
            .stage(Passthrough::new("input", StageRole::AudioInput))
            .stage(HangingStop)
            .stage(Passthrough::new("output", StageRole::AudioOutput))
            .stop_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let task = Arc::new(pipeline.into_task("CA5"));

        let runner = tokio::spawn({
            let task = Arc::clone(&task);
            async move { task.run().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), task.cancel())
            .await
            .expect("teardown finished");
        runner.await.unwrap().unwrap();
        assert_eq!(task.stop_order(), vec!["output", "hanging", "input"]);
    }
}
