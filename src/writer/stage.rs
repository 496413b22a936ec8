use std::sync::Arc;

use gasket::framework::*;
use tokio::sync::{Notify, mpsc::UnboundedReceiver};
use tracing::{error, info, warn};

use crate::{
    rpc::ChainSource, shutdown::ShutdownSignal, sync::engine::SyncEngine, writer::tasks::TaskRunner,
};

use super::{
    protocol::TaskResponse,
    queue::{Envelope, TaskQueue},
};

/*
    Writer Stage

    Owns the only mutation path into the store. Reader tasks arriving on the socket and sync
    steps triggered by new chain tips are executed here one at a time, so no two writes ever
    overlap. Queued tasks run before the next sync step.
*/

pub type Source = Arc<dyn ChainSource>;

#[derive(Debug)]
pub enum WriterUnit {
    Task(Envelope),
    SyncStep,
}

#[derive(Stage)]
#[stage(name = "writer", unit = "WriterUnit", worker = "Worker")]
pub struct Stage {
    engine: SyncEngine<Source>,
    runner: TaskRunner,
    inbox: UnboundedReceiver<Envelope>,
    new_tip: Arc<Notify>,
    shutdown: ShutdownSignal,
}

impl Stage {
    pub fn new(
        engine: SyncEngine<Source>,
        runner: TaskRunner,
        inbox: UnboundedReceiver<Envelope>,
        new_tip: Arc<Notify>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            engine,
            runner,
            inbox,
            new_tip,
            shutdown,
        }
    }
}

enum Wake {
    Task(Envelope),
    NewTip,
    Stop,
}

pub struct Worker {
    queue: TaskQueue,
}

#[async_trait::async_trait(?Send)]
impl gasket::framework::Worker<Stage> for Worker {
    async fn bootstrap(stage: &Stage) -> Result<Self, WorkerError> {
        let tip = stage.engine.local_tip().or_panic()?;

        match tip {
            Some(tip) => info!(%tip, "starting writer"),
            None => info!("starting writer with an empty index"),
        }

        Ok(Worker {
            queue: TaskQueue::new(),
        })
    }

    async fn schedule(
        &mut self,
        stage: &mut Stage,
    ) -> Result<WorkSchedule<WriterUnit>, WorkerError> {
        loop {
            if stage.shutdown.is_triggered() {
                return Ok(WorkSchedule::Done);
            }

            while let Ok(envelope) = stage.inbox.try_recv() {
                self.queue.push(envelope);
            }

            if let Some(envelope) = self.queue.pop() {
                return Ok(WorkSchedule::Unit(WriterUnit::Task(envelope)));
            }

            if stage.engine.is_syncing() {
                return Ok(WorkSchedule::Unit(WriterUnit::SyncStep));
            }

            let wake = tokio::select! {
                res = stage.inbox.recv() => match res {
                    Some(envelope) => Wake::Task(envelope),
                    None => Wake::Stop,
                },
                _ = stage.new_tip.notified() => Wake::NewTip,
                _ = stage.shutdown.triggered() => Wake::Stop,
            };

            match wake {
                Wake::Task(envelope) => self.queue.push(envelope),
                Wake::NewTip => {
                    stage.engine.on_new_tip();
                }
                Wake::Stop => return Ok(WorkSchedule::Done),
            }
        }
    }

    async fn execute(&mut self, unit: &WriterUnit, stage: &mut Stage) -> Result<(), WorkerError> {
        match unit {
            WriterUnit::Task(envelope) => {
                let response = match stage.runner.run(&mut stage.engine, &envelope.task) {
                    Ok(result) => TaskResponse::ok(envelope.task.id.clone(), result),
                    Err(e) => {
                        warn!(
                            id = %envelope.task.id,
                            method = %envelope.task.method,
                            error = %e,
                            "task failed"
                        );
                        TaskResponse::err(envelope.task.id.clone(), e)
                    }
                };

                if envelope.reply.send(response).is_err() {
                    warn!(id = %envelope.task.id, "reader went away before the reply");
                }
            }
            WriterUnit::SyncStep => {
                if let Err(e) = stage.engine.sync_step() {
                    error!(error = %e, "sync failed, stopping writer");
                    return Err(WorkerError::Panic);
                }
            }
        }

        Ok(())
    }

    async fn teardown(&mut self) -> Result<(), WorkerError> {
        if !self.queue.is_empty() {
            warn!(dropped = self.queue.len(), "writer stopping with queued tasks");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::kv_store::tests::temp_store,
        sync::{
            Config, Network,
            engine::tests::{SimChain, build_chain, p2pkh},
        },
        writer::protocol::Task,
    };
    use gasket::framework::Worker as _;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn envelope(
        id: &str,
        priority: i64,
        reply: &mpsc::UnboundedSender<TaskResponse>,
    ) -> Envelope {
        Envelope {
            task: Task {
                id: id.into(),
                method: "createWallet".into(),
                params: vec![json!("11".repeat(32))],
            },
            priority,
            reply: reply.clone(),
        }
    }

    #[tokio::test]
    async fn tasks_run_before_sync_and_by_priority() {
        let (_dir, store) = temp_store();
        let chain = Arc::new(SimChain::default());
        chain.replace(build_chain(&[], 4, 0, &p2pkh(1)));

        let config = Config {
            start_height: Some(0),
            ..Default::default()
        };
        let shutdown = ShutdownSignal::new();
        let source: Source = chain;
        let engine = SyncEngine::new(source, store, &config, shutdown.clone()).unwrap();

        let (inbox, receiver) = mpsc::unbounded_channel();
        let new_tip = Arc::new(Notify::new());

        let mut stage = Stage::new(
            engine,
            TaskRunner::new(Network::Regtest, 100),
            receiver,
            new_tip.clone(),
            shutdown.clone(),
        );

        let mut worker = Worker::bootstrap(&stage).await.unwrap();

        let (reply, mut replies) = mpsc::unbounded_channel();
        inbox.send(envelope("low", 0, &reply)).unwrap();
        inbox.send(envelope("high", 9, &reply)).unwrap();
        new_tip.notify_one();

        let mut units = vec![];

        while units.len() < 4 {
            let unit = match worker.schedule(&mut stage).await.unwrap() {
                WorkSchedule::Unit(unit) => unit,
                _ => panic!("expected a unit"),
            };

            worker.execute(&unit, &mut stage).await.unwrap();
            units.push(unit);
        }

        assert!(matches!(&units[0], WriterUnit::Task(e) if e.task.id == "high"));
        assert!(matches!(&units[1], WriterUnit::Task(e) if e.task.id == "low"));
        assert!(matches!(units[2], WriterUnit::SyncStep));

        // same wallet twice, only the first one creates it
        assert_eq!(replies.recv().await.unwrap().result, json!({ "created": true }));
        assert_eq!(replies.recv().await.unwrap().result, json!({ "created": false }));

        shutdown.trigger();
        assert!(matches!(
            worker.schedule(&mut stage).await.unwrap(),
            WorkSchedule::Done
        ));
    }
}
