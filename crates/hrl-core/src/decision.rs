//! Decision-maker capability contract
//!
//! Concrete policies (tabular Q-learning, DQN, scripted play) live outside the
//! engine. Agents only talk to them through [`DecisionMaker`], behind a
//! [`SharedDecisionMaker`] handle so that a parent's decision maker can own or
//! share the handles of its children's decision makers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, mpsc as std_mpsc};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::action::{ActionId, DO_NOTHING};
use crate::error::{HrlError, Result};
use crate::state::StateVector;

/// The unit of learning
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub prev_state: StateVector,
    pub action: ActionId,
    pub reward: f64,
    pub next_state: StateVector,
    pub terminal: bool,
}

/// Pluggable policy mapping states to actions and consuming transitions
pub trait DecisionMaker: Send {
    /// Persistent name, used to attach to stored models
    fn name(&self) -> &str;

    /// Pick one of `legal` directly
    fn choose_action(
        &mut self,
        state: &StateVector,
        legal: &[ActionId],
        use_target: bool,
    ) -> Result<ActionId>;

    /// One value estimate per action in the agent's action space
    fn action_values(&self, state: &StateVector, use_target: bool) -> Result<Vec<f64>>;

    /// Consume one transition; must not block beyond a bounded enqueue
    fn learn(&mut self, transition: Transition) -> Result<()>;

    /// Current exploration rate in `[0, 1]`
    fn exploration_probability(&self) -> Result<f64>;

    /// Episode-end reporting
    fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()>;

    /// Decision maker owned for the child at `key`, if any
    fn sub_decision_maker(&self, _key: ActionId) -> Option<SharedDecisionMaker> {
        None
    }

    /// Attach the decision maker used by the child at `key`
    fn set_sub_decision_maker(&mut self, _key: ActionId, _dm: SharedDecisionMaker) {}
}

/// Shared, lockable decision-maker handle
pub type SharedDecisionMaker = Arc<Mutex<dyn DecisionMaker>>;

/// Wrap a decision maker in a shared handle
pub fn share<D: DecisionMaker + 'static>(dm: D) -> SharedDecisionMaker {
    Arc::new(Mutex::new(dm))
}

/// Lock a shared decision maker, surfacing poisoning as an error
pub fn lock_decision_maker(dm: &SharedDecisionMaker) -> Result<MutexGuard<'_, dyn DecisionMaker + 'static>> {
    dm.lock()
        .map_err(|e| HrlError::DecisionMaker(format!("decision maker lock poisoned: {}", e)))
}

/// Decision maker for agents without a policy of their own
///
/// Always answers do-nothing, never learns, and only serves as the holder of
/// its children's decision makers.
pub struct NullDecisionMaker {
    name: String,
    num_actions: usize,
    subs: BTreeMap<ActionId, SharedDecisionMaker>,
}

impl NullDecisionMaker {
    pub fn new(name: impl Into<String>, num_actions: usize) -> Self {
        Self {
            name: name.into(),
            num_actions,
            subs: BTreeMap::new(),
        }
    }
}

impl DecisionMaker for NullDecisionMaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn choose_action(
        &mut self,
        _state: &StateVector,
        _legal: &[ActionId],
        _use_target: bool,
    ) -> Result<ActionId> {
        Ok(DO_NOTHING)
    }

    fn action_values(&self, _state: &StateVector, _use_target: bool) -> Result<Vec<f64>> {
        Ok(vec![0.0; self.num_actions])
    }

    fn learn(&mut self, _transition: Transition) -> Result<()> {
        Ok(())
    }

    fn exploration_probability(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn end_run(&mut self, _reward: f64, _score: f64, _steps: u64) -> Result<()> {
        Ok(())
    }

    fn sub_decision_maker(&self, key: ActionId) -> Option<SharedDecisionMaker> {
        self.subs.get(&key).cloned()
    }

    fn set_sub_decision_maker(&mut self, key: ActionId, dm: SharedDecisionMaker) {
        self.subs.insert(key, dm);
    }
}

enum Job {
    Learn(Transition),
    EndRun { reward: f64, score: f64, steps: u64 },
    Flush(std_mpsc::Sender<()>),
}

/// Applies learning updates on a worker thread
///
/// `learn` and `end_run` enqueue and return immediately; the worker applies
/// them to the wrapped decision maker in submission order. Queries go straight
/// to the wrapped decision maker.
pub struct BackgroundLearner {
    name: String,
    inner: SharedDecisionMaker,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundLearner {
    pub fn spawn(inner: SharedDecisionMaker) -> Result<Self> {
        let name = lock_decision_maker(&inner)?.name().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let target = Arc::clone(&inner);
        let worker_name = name.clone();

        let worker = std::thread::Builder::new()
            .name(format!("learner-{}", name))
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let result = match job {
                        Job::Flush(done) => {
                            let _ = done.send(());
                            Ok(())
                        }
                        Job::Learn(transition) => {
                            lock_decision_maker(&target).and_then(|mut dm| dm.learn(transition))
                        }
                        Job::EndRun {
                            reward,
                            score,
                            steps,
                        } => lock_decision_maker(&target)
                            .and_then(|mut dm| dm.end_run(reward, score, steps)),
                    };
                    if let Err(e) = result {
                        error!("Background learner {} failed: {}", worker_name, e);
                    }
                }
                debug!("Background learner {} exiting", worker_name);
            })?;

        Ok(Self {
            name,
            inner,
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        self.jobs
            .as_ref()
            .ok_or_else(|| HrlError::DecisionMaker(format!("{} is shut down", self.name)))?
            .send(job)
            .map_err(|_| HrlError::DecisionMaker(format!("{} worker is gone", self.name)))
    }

    /// Block until every job queued so far has been applied
    pub fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = std_mpsc::channel();
        self.enqueue(Job::Flush(done_tx))?;
        done_rx
            .recv()
            .map_err(|_| HrlError::DecisionMaker(format!("{} worker is gone", self.name)))
    }
}

impl Drop for BackgroundLearner {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl DecisionMaker for BackgroundLearner {
    fn name(&self) -> &str {
        &self.name
    }

    fn choose_action(
        &mut self,
        state: &StateVector,
        legal: &[ActionId],
        use_target: bool,
    ) -> Result<ActionId> {
        lock_decision_maker(&self.inner)?.choose_action(state, legal, use_target)
    }

    fn action_values(&self, state: &StateVector, use_target: bool) -> Result<Vec<f64>> {
        lock_decision_maker(&self.inner)?.action_values(state, use_target)
    }

    fn learn(&mut self, transition: Transition) -> Result<()> {
        self.enqueue(Job::Learn(transition))
    }

    fn exploration_probability(&self) -> Result<f64> {
        lock_decision_maker(&self.inner)?.exploration_probability()
    }

    fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()> {
        self.enqueue(Job::EndRun {
            reward,
            score,
            steps,
        })
    }

    fn sub_decision_maker(&self, key: ActionId) -> Option<SharedDecisionMaker> {
        match lock_decision_maker(&self.inner) {
            Ok(dm) => dm.sub_decision_maker(key),
            Err(e) => {
                warn!("{}: no sub decision maker for {}: {}", self.name, key, e);
                None
            }
        }
    }

    fn set_sub_decision_maker(&mut self, key: ActionId, dm: SharedDecisionMaker) {
        match lock_decision_maker(&self.inner) {
            Ok(mut inner) => inner.set_sub_decision_maker(key, dm),
            Err(e) => warn!("{}: dropping sub decision maker for {}: {}", self.name, key, e),
        }
    }
}
