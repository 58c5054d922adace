//! Thread-owned stateful workers.
//!
//! An [`Actor`] owns one value of type `S` on a dedicated thread. The value is
//! built inside that thread, so it never has to be `Send`; callers only ever
//! send it closures. Messages run one at a time in the order they were sent.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use burn::tensor::backend::AutodiffBackend;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use gt_data::DataSource;
use gt_optimizer::Configuration;
use gt_types::{ActorError, GtResult};
use tracing::{debug, info, warn};

use crate::trainable::Trainable;
use crate::training::LoopSettings;

type Message<S> = Box<dyn FnOnce(&mut S) + Send>;

pub struct Actor<S: 'static> {
    name: String,
    mailbox: Option<Sender<Message<S>>>,
    handle: Option<JoinHandle<()>>,
}

/// Pending result of [`Actor::ask`].
pub struct Reply<R> {
    name: String,
    receiver: Receiver<R>,
}

impl<R> Reply<R> {
    /// Block until the actor has handled the message.
    pub fn wait(self) -> GtResult<R> {
        self.receiver
            .recv()
            .map_err(|_| ActorError::Stopped { name: self.name }.into())
    }
}

impl<S: 'static> Actor<S> {
    /// Start the worker thread and build its state with `init`. Returns once
    /// the state exists, or with `ActorError::StartFailed` if `init` failed.
    pub fn spawn<F>(name: impl Into<String>, init: F) -> GtResult<Self>
    where
        F: FnOnce() -> GtResult<S> + Send + 'static,
    {
        let name = name.into();
        let (mailbox, inbox) = unbounded::<Message<S>>();
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut state = match panic::catch_unwind(AssertUnwindSafe(init)) {
                    Ok(Ok(state)) => state,
                    Ok(Err(e)) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                    Err(_) => {
                        let _ = ready_tx.send(Err("initializer panicked".to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                drop(ready_tx);

                for message in inbox.iter() {
                    message(&mut state);
                }
                debug!("Actor {} mailbox closed", thread_name);
            })
            .map_err(|source| ActorError::Spawn {
                name: name.clone(),
                source,
            })?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("worker exited before reporting readiness".to_string()));
        if let Err(message) = started {
            let _ = handle.join();
            return Err(ActorError::StartFailed { name, message }.into());
        }

        info!("Actor {} started", name);
        Ok(Self {
            name,
            mailbox: Some(mailbox),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `f` and return a handle to its result.
    pub fn ask<R, F>(&self, f: F) -> GtResult<Reply<R>>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.send(Box::new(move |state: &mut S| {
            let _ = tx.send(f(state));
        }))?;
        Ok(Reply {
            name: self.name.clone(),
            receiver: rx,
        })
    }

    /// Queue `f` without waiting for it.
    pub fn tell<F>(&self, f: F) -> GtResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.send(Box::new(f))
    }

    /// Close the mailbox, let queued messages finish and join the thread.
    pub fn stop(mut self) -> GtResult<()> {
        self.shutdown()
    }

    fn send(&self, message: Message<S>) -> GtResult<()> {
        let stopped = || ActorError::Stopped {
            name: self.name.clone(),
        };
        self.mailbox
            .as_ref()
            .ok_or_else(stopped)?
            .send(message)
            .map_err(|_| stopped().into())
    }

    fn shutdown(&mut self) -> GtResult<()> {
        self.mailbox.take();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.join().is_err() {
            warn!("Actor {} panicked while handling a message", self.name);
            return Err(ActorError::Stopped {
                name: self.name.clone(),
            }
            .into());
        }
        debug!("Actor {} stopped", self.name);
        Ok(())
    }
}

impl<S: 'static> Drop for Actor<S> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// An actor holding one [`Trainable`], set up on its own thread.
pub fn spawn_trainer<B: AutodiffBackend>(
    name: impl Into<String>,
    configuration: Configuration,
    source: Arc<dyn DataSource>,
    settings: LoopSettings,
    seed: u64,
    device: B::Device,
) -> GtResult<Actor<Trainable<B>>> {
    Actor::spawn(name, move || {
        Trainable::setup(&configuration, source.as_ref(), &settings, seed, &device)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use gt_data::{SyntheticConfig, SyntheticSource};
    use gt_types::{validation_error, GtError};
    use std::rc::Rc;

    #[test]
    fn messages_run_in_send_order() {
        let actor = Actor::spawn("counter", || Ok(Vec::<u32>::new())).unwrap();
        for i in 0..50 {
            actor.tell(move |seen| seen.push(i)).unwrap();
        }
        let seen = actor.ask(|seen| seen.clone()).unwrap().wait().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        assert_eq!(actor.name(), "counter");
        actor.stop().unwrap();
    }

    #[test]
    fn state_need_not_be_send() {
        let actor = Actor::spawn("local", || Ok(Rc::new(5usize))).unwrap();
        let value = actor.ask(|rc| **rc + 1).unwrap().wait().unwrap();
        assert_eq!(value, 6);
    }

    #[test]
    fn failed_initializer_is_reported() {
        let result = Actor::<u32>::spawn("broken", || Err(validation_error!("no state")));
        match result {
            Err(GtError::Actor(ActorError::StartFailed { name, message })) => {
                assert_eq!(name, "broken");
                assert!(message.contains("no state"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        let result = Actor::<u32>::spawn("panicky", || panic!("init exploded"));
        assert!(matches!(
            result,
            Err(GtError::Actor(ActorError::StartFailed { .. }))
        ));
    }

    #[test]
    fn panicking_message_stops_actor() {
        let actor = Actor::spawn("fragile", || Ok(0u32)).unwrap();
        let reply = actor.ask(|_: &mut u32| -> u32 { panic!("boom") }).unwrap();
        assert!(matches!(
            reply.wait(),
            Err(GtError::Actor(ActorError::Stopped { .. }))
        ));

        let after = actor.ask(|n| *n).and_then(Reply::wait);
        assert!(after.is_err());
        assert!(actor.stop().is_err());
    }

    #[test]
    fn trainer_actors_step_concurrently() {
        type TestBackend = Autodiff<NdArray>;

        let source: Arc<dyn DataSource> = Arc::new(SyntheticSource::new(SyntheticConfig {
            train_size: 300,
            test_size: 130,
            seed: 3,
            noise: 0.2,
        }));
        let settings = LoopSettings {
            batch_size: 32,
            train_cap: 128,
            eval_cap: 64,
        };

        let actors: Vec<_> = [(0.01, 0.9), (0.1, 0.5)]
            .iter()
            .enumerate()
            .map(|(i, &(lr, momentum))| {
                spawn_trainer::<TestBackend>(
                    format!("trainer-{i}"),
                    Configuration::new().with("lr", lr).with("momentum", momentum),
                    Arc::clone(&source),
                    settings.clone(),
                    i as u64,
                    Default::default(),
                )
                .unwrap()
            })
            .collect();

        for _ in 0..2 {
            let replies: Vec<_> = actors
                .iter()
                .map(|actor| actor.ask(|trainable| trainable.step()).unwrap())
                .collect();
            for reply in replies {
                let metric = reply.wait().unwrap();
                assert!((0.0..=1.0).contains(&metric));
            }
        }

        for actor in actors {
            let iterations = actor.ask(|t| t.iteration()).unwrap().wait().unwrap();
            assert_eq!(iterations, 2);
            actor.stop().unwrap();
        }
    }

    #[test]
    fn trainer_rejects_invalid_configuration() {
        let source: Arc<dyn DataSource> = Arc::new(SyntheticSource::default());
        let result = spawn_trainer::<Autodiff<NdArray>>(
            "bad",
            Configuration::new().with("lr", 0.0),
            source,
            LoopSettings::default(),
            0,
            Default::default(),
        );
        assert!(matches!(
            result,
            Err(GtError::Actor(ActorError::StartFailed { .. }))
        ));
    }
}
