use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::handler;
use super::state::Input;
use super::{ConsumerEvent, Shared, Signal};
use crate::error::{ConsumerError, StoreError, StoreResult};
use crate::gc::{Collector, Reclaimer};
use crate::heartbeat;
use crate::message::{now_ms, Message};
use crate::storage::keys::{KeyScope, Keys};
use crate::storage::Store;

pub(super) fn spawn(
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<Signal>,
    inbox: mpsc::UnboundedReceiver<Signal>,
) -> JoinHandle<Result<(), ConsumerError>> {
    let span = info_span!("consumer", queue = %shared.queue, consumer_id = %shared.id);
    tokio::spawn(
        async move {
            let worker = Worker::start(shared, signals, inbox);
            worker.run().await
        }
        .instrument(span),
    )
}

struct Worker {
    shared: Arc<Shared>,
    main_key: String,
    processing_key: String,
    collector: Collector,
    inbox: mpsc::UnboundedReceiver<Signal>,
    halt_gc: watch::Sender<bool>,
    halt_heartbeat: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the heartbeat and the reclaimer, each on its own connection.
    fn start(
        shared: Arc<Shared>,
        signals: mpsc::UnboundedSender<Signal>,
        inbox: mpsc::UnboundedReceiver<Signal>,
    ) -> Self {
        let keys = Keys::new(KeyScope::consumer(&shared.queue, &shared.id));
        let collector = Collector::new(
            &shared.queue,
            shared.config.consumer.message_retry_threshold,
            shared.metrics.clone(),
        );

        let (halt_heartbeat, heartbeat_rx) = watch::channel(false);
        let heartbeat = heartbeat::spawn(
            Arc::clone(&shared.connector),
            shared.queue.clone(),
            shared.id.clone(),
            shared.config.heartbeat.clone(),
            heartbeat_rx,
            signals.clone(),
        );

        let (halt_gc, gc_rx) = watch::channel(false);
        let reclaimer = Reclaimer {
            queue: shared.queue.clone(),
            owner: shared.id.clone(),
            config: shared.config.gc.clone(),
            consumer_ttl_ms: shared.config.consumer.message_ttl_ms,
            collector: collector.clone(),
            events: shared.events.clone(),
        };
        let gc = reclaimer.spawn(Arc::clone(&shared.connector), gc_rx, signals);

        Self {
            main_key: keys.queue.unwrap_or_default(),
            processing_key: keys.processing.unwrap_or_default(),
            shared,
            collector,
            inbox,
            halt_gc,
            halt_heartbeat,
            tasks: vec![heartbeat, gc],
        }
    }

    async fn run(mut self) -> Result<(), ConsumerError> {
        match self.serve().await {
            Ok(()) => {
                self.shutdown().await;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Claim and process messages until stopped. The claim connection is
    /// closed on return.
    async fn serve(&mut self) -> StoreResult<()> {
        loop {
            match self.inbox.recv().await {
                Some(Signal::HeartbeatStarted) => break,
                Some(Signal::Stop) | None => return Ok(()),
                Some(Signal::Fault(err)) => return Err(err),
                Some(other) => debug!(?other, "signal ignored while going up"),
            }
        }
        let mut claim = self.shared.connector.connect().await?;
        self.shared.advance(Input::Started);
        self.shared.emit(ConsumerEvent::Up);
        info!("consumer up");

        loop {
            debug!("waiting for messages");
            // One claim stays in flight until it resolves or the consumer
            // stops; reissuing it would leave the first one blocked server-side.
            let claimed = {
                let pop =
                    claim.pop_push_blocking(&self.main_key, &self.processing_key, Duration::ZERO);
                tokio::pin!(pop);
                loop {
                    tokio::select! {
                        biased;
                        signal = self.inbox.recv() => match signal {
                            Some(Signal::Stop) | None => return Ok(()),
                            Some(Signal::Fault(err)) => return Err(err),
                            Some(other) => debug!(?other, "signal ignored while up"),
                        },
                        claimed = &mut pop => break claimed?,
                    }
                }
            };
            let Some(raw) = claimed else { continue };

            self.shared.advance(Input::Claimed);
            if let Some(m) = &self.shared.metrics {
                m.record_processing(&self.shared.queue);
            }
            let stop_requested = self.process(claim.as_mut(), raw).await?;
            self.shared.advance(Input::Finished);
            if stop_requested {
                return Ok(());
            }
        }
    }

    /// Handle one claimed entry through to its disposition. Returns whether
    /// a stop arrived meanwhile.
    async fn process(&mut self, claim: &mut dyn Store, raw: String) -> StoreResult<bool> {
        let message = match Message::decode(&raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "claimed an undecodable entry");
                let disposition = self
                    .collector
                    .collect_poison(claim, &self.processing_key, raw)
                    .await?;
                self.shared.emit(disposition.into());
                return Ok(false);
            }
        };

        let consumer_ttl = self.shared.config.consumer.message_ttl_ms;
        if message.is_expired(now_ms(), consumer_ttl) {
            debug!(msg_id = %message.uuid, "message has expired");
            let disposition = self
                .collector
                .collect_expired_message(claim, &self.processing_key, message)
                .await?;
            self.shared.emit(disposition.into());
            return Ok(false);
        }

        debug!(msg_id = %message.uuid, attempts = message.attempts, "processing message");
        let outcome = handler::dispatch(
            Arc::clone(&self.shared.handler),
            message.clone(),
            self.shared.config.consumer.consume_timeout(),
        );
        tokio::pin!(outcome);

        let mut stop_requested = false;
        let mut inbox_open = true;
        let result = loop {
            tokio::select! {
                result = &mut outcome => break result,
                signal = self.inbox.recv(), if inbox_open => match signal {
                    Some(Signal::Stop) => {
                        stop_requested = true;
                        self.shared.advance(Input::Stop);
                        info!(msg_id = %message.uuid, "stop requested, finishing in-flight message");
                    }
                    Some(Signal::Fault(err)) => return Err(err),
                    Some(other) => debug!(?other, "signal ignored while consuming"),
                    None => {
                        inbox_open = false;
                        stop_requested = true;
                    }
                },
            }
        };

        match result {
            Ok(()) => {
                claim.delete(&self.processing_key).await?;
                if let Some(m) = &self.shared.metrics {
                    m.record_acknowledged(&self.shared.queue);
                }
                debug!(msg_id = %message.uuid, "message acknowledged");
                self.shared.emit(ConsumerEvent::Acknowledged(message));
            }
            Err(err) => {
                error!(msg_id = %message.uuid, reason = %err, "consume failure");
                if let Some(m) = &self.shared.metrics {
                    m.record_unacknowledged(&self.shared.queue);
                }
                let disposition = self
                    .collector
                    .collect_message(claim, &self.processing_key, message, Some(err.into()))
                    .await?;
                self.shared.emit(disposition.into());
            }
        }
        Ok(stop_requested)
    }

    /// Halt the reclaimer, then the heartbeat, then report down.
    async fn shutdown(mut self) {
        self.shared.advance(Input::Stop);
        info!("consumer going down");

        let _ = self.halt_gc.send(true);
        let halted = match self.await_halt(|s| matches!(s, Signal::GcHalted)).await {
            Ok(()) => {
                self.shared.advance(Input::GcHalted);
                let _ = self.halt_heartbeat.send(true);
                self.await_halt(|s| matches!(s, Signal::HeartbeatHalted))
                    .await
            }
            Err(err) => Err(err),
        };

        match halted {
            Ok(()) => {
                self.shared.advance(Input::HeartbeatHalted);
            }
            Err(err) => {
                warn!(error = %err, "store fault while going down");
                self.abort_tasks();
                self.shared.advance(Input::Fault);
            }
        }
        self.shared.emit(ConsumerEvent::Down);
        info!("consumer down");
    }

    async fn await_halt(&mut self, is_halt: impl Fn(&Signal) -> bool) -> StoreResult<()> {
        loop {
            match self.inbox.recv().await {
                Some(signal) if is_halt(&signal) => return Ok(()),
                Some(Signal::Fault(err)) => return Err(err),
                Some(other) => debug!(?other, "signal ignored while going down"),
                // Every component has already exited.
                None => return Ok(()),
            }
        }
    }

    /// Tear everything down without the orderly halt. The heartbeat key is
    /// left to lapse so other reclaimers recover whatever was in flight.
    fn fail(&mut self, err: StoreError) -> ConsumerError {
        error!(error = %err, "fatal store fault, consumer torn down");
        self.abort_tasks();
        self.shared.advance(Input::Fault);
        self.shared.emit(ConsumerEvent::Down);
        ConsumerError::Fatal(err)
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
