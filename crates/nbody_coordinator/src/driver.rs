//! Simulation driver.
//!
//! Runs [`Coordinator::step`] in a loop. Between steps it applies pending
//! control messages, paces to the target step rate and periodically logs the
//! total momentum. When the control stream ends (or `max_steps` is reached)
//! it shuts the worker pool down.

use std::time::Duration;

use anyhow::Result;
use nbody_core::momentum;
use nbody_net::{ControlMessage, JobQueue, StateStore};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::snapshot::{self, Snapshot};
use crate::step::Coordinator;

/// How long a paused driver sleeps before checking for control messages.
const PAUSE_IDLE: Duration = Duration::from_millis(50);

/// Driver loop settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Target steps per second (0 = as fast as possible).
    pub step_rate: f64,
    /// Maximum number of steps to run (0 = unlimited).
    pub max_steps: u64,
    /// Log total momentum every this many steps (0 = never).
    pub print_every: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            step_rate: 0.0,
            max_steps: 0,
            print_every: 100,
        }
    }
}

/// What the loop should do after a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Owns a coordinator and the receiving end of the control channel.
#[derive(Debug)]
pub struct Driver<Q, S> {
    coordinator: Coordinator<Q, S>,
    config: DriverConfig,
    control: mpsc::Receiver<ControlMessage>,
    paused: bool,
    steps: u64,
}

impl<Q: JobQueue, S: StateStore> Driver<Q, S> {
    #[must_use]
    pub fn new(
        coordinator: Coordinator<Q, S>,
        config: DriverConfig,
        control: mpsc::Receiver<ControlMessage>,
    ) -> Self {
        Self {
            coordinator,
            config,
            control,
            paused: false,
            steps: 0,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &Coordinator<Q, S> {
        &self.coordinator
    }

    /// Steps run so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Run until the control stream ends or `max_steps` is reached, then
    /// shut the workers down.
    ///
    /// # Errors
    ///
    /// Returns the first step error. Workers are still told to shut down.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            step_rate = self.config.step_rate,
            max_steps = self.config.max_steps,
            "starting simulation loop"
        );

        let outcome = self.run_loop().await;
        let reason = match &outcome {
            Ok(()) => "simulation finished",
            Err(_) => "simulation failed",
        };
        self.coordinator.shutdown(reason).await?;
        outcome
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            while let Ok(message) = self.control.try_recv() {
                if self.apply(message).await? == Flow::Stop {
                    info!(steps = self.steps, "control stream ended");
                    return Ok(());
                }
            }

            if self.paused {
                tokio::time::sleep(PAUSE_IDLE).await;
                continue;
            }

            let start = Instant::now();
            self.coordinator.step().await?;
            self.steps += 1;

            if self.config.print_every > 0 && self.steps % self.config.print_every == 0 {
                let p = momentum(self.coordinator.bodies());
                info!(
                    step = self.steps,
                    momentum = p.length(),
                    px = p.x,
                    py = p.y,
                    pz = p.z,
                    "momentum"
                );
            }

            if self.config.max_steps > 0 && self.steps >= self.config.max_steps {
                info!(steps = self.steps, "step limit reached");
                return Ok(());
            }

            if self.config.step_rate > 0.0 {
                let budget = Duration::from_secs_f64(1.0 / self.config.step_rate);
                let elapsed = start.elapsed();
                if elapsed < budget {
                    tokio::time::sleep(budget - elapsed).await;
                } else {
                    warn!(
                        step = self.steps,
                        elapsed_ms = elapsed.as_millis() as u64,
                        budget_ms = budget.as_millis() as u64,
                        "step exceeded time budget"
                    );
                }
            }
        }
    }

    async fn apply(&mut self, message: ControlMessage) -> Result<Flow> {
        match message {
            ControlMessage::Chunks(chunks) if chunks > 0 => {
                info!(chunks, "chunk count changed");
                self.coordinator.set_chunks(chunks);
            }
            ControlMessage::Chunks(_) => warn!("ignoring zero chunk count"),
            ControlMessage::DeltaT(delta_t) if delta_t.is_finite() => {
                info!(delta_t, "time step changed");
                self.coordinator.set_delta_t(delta_t);
            }
            ControlMessage::DeltaT(delta_t) => warn!(delta_t, "ignoring non-finite time step"),
            ControlMessage::StepRate(rate) if rate.is_finite() && rate >= 0.0 => {
                info!(rate, "step rate changed");
                self.config.step_rate = rate;
            }
            ControlMessage::StepRate(rate) => warn!(rate, "ignoring invalid step rate"),
            ControlMessage::Paused(paused) => {
                info!(paused, "pause toggled");
                self.paused = paused;
            }
            ControlMessage::SavePlanets(path) => {
                let snapshot = Snapshot {
                    bodies: self.coordinator.bodies().clone(),
                    step: self.steps,
                    delta_t: self.coordinator.config().delta_t,
                };
                if let Err(err) = snapshot::save(&path, &snapshot).await {
                    let message = format!("{err:#}");
                    error!(error = %message, "snapshot failed");
                }
            }
            ControlMessage::LoadPlanets(path) => match snapshot::load(&path).await {
                Ok(loaded) => {
                    self.coordinator.set_delta_t(loaded.delta_t);
                    self.coordinator.reset_run(loaded.bodies).await?;
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(error = %message, "snapshot not loaded");
                }
            },
            ControlMessage::End => return Ok(Flow::Stop),
        }
        Ok(Flow::Continue)
    }
}
