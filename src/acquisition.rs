//! Acquisition state control.
//!
//! The preamble and the sample payload are read with two separate queries. If
//! the instrument keeps acquiring in between, the two can describe different
//! records. [`AcquisitionController::freeze`] stops acquisition and hands back
//! a guard that restarts it when released or dropped, whichever comes first.

use crate::scpi_terminal::{ScpiTransport, TerminalError};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Running,
    Stopped,
}

/// What to do once a frozen read is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Always issue `:RUN`.
    #[default]
    Run,
    /// Leave the instrument stopped, e.g. to read several sources from one
    /// single-shot record.
    LeaveStopped,
}

#[derive(Debug, Clone, Copy)]
pub struct AcquisitionController {
    state: AcquisitionState,
    resume: ResumePolicy,
}

impl AcquisitionController {
    /// The instrument is assumed to be running when a session starts.
    pub fn new(resume: ResumePolicy) -> Self {
        Self {
            state: AcquisitionState::Running,
            resume,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn resume_policy(&self) -> ResumePolicy {
        self.resume
    }

    pub fn set_resume_policy(&mut self, resume: ResumePolicy) {
        self.resume = resume;
    }

    pub fn stop<T: ScpiTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), TerminalError> {
        transport.write(":STOP")?;
        self.state = AcquisitionState::Stopped;
        Ok(())
    }

    pub fn run<T: ScpiTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), TerminalError> {
        transport.write(":RUN")?;
        self.state = AcquisitionState::Running;
        Ok(())
    }

    /// Arm one acquisition; the instrument stops by itself after it triggers.
    pub fn single<T: ScpiTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), TerminalError> {
        transport.write(":SING")?;
        self.state = AcquisitionState::Stopped;
        Ok(())
    }

    /// Stop acquisition and return a guard giving access to the transport.
    pub fn freeze<'a, T: ScpiTransport + ?Sized>(
        &'a mut self,
        transport: &'a mut T,
    ) -> Result<FrozenAcquisition<'a, T>, TerminalError> {
        self.stop(transport)?;
        Ok(FrozenAcquisition {
            controller: self,
            transport,
            released: false,
        })
    }

    /// Run `body` with acquisition stopped, then apply the resume policy on
    /// every exit path. An error from `body` takes precedence over an error
    /// from resuming.
    pub fn with_frozen_acquisition<T, R, E, F>(
        &mut self,
        transport: &mut T,
        body: F,
    ) -> Result<R, E>
    where
        T: ScpiTransport + ?Sized,
        E: From<TerminalError>,
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        let mut frozen = self.freeze(transport)?;
        let outcome = body(&mut *frozen);
        let released = frozen.release();

        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(err) => {
                if let Err(release_err) = released {
                    log::warn!("Failed to resume acquisition after an error: {}", release_err);
                }
                Err(err)
            }
        }
    }
}

impl Default for AcquisitionController {
    fn default() -> Self {
        Self::new(ResumePolicy::default())
    }
}

/// Acquisition is stopped for as long as this guard lives.
pub struct FrozenAcquisition<'a, T: ScpiTransport + ?Sized> {
    controller: &'a mut AcquisitionController,
    transport: &'a mut T,
    released: bool,
}

impl<T: ScpiTransport + ?Sized> FrozenAcquisition<'_, T> {
    /// Apply the resume policy now and report whether it worked.
    pub fn release(mut self) -> Result<(), TerminalError> {
        self.released = true;
        self.resume()
    }

    fn resume(&mut self) -> Result<(), TerminalError> {
        match self.controller.resume {
            ResumePolicy::Run => self.controller.run(&mut *self.transport),
            ResumePolicy::LeaveStopped => Ok(()),
        }
    }
}

impl<T: ScpiTransport + ?Sized> Deref for FrozenAcquisition<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.transport
    }
}

impl<T: ScpiTransport + ?Sized> DerefMut for FrozenAcquisition<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.transport
    }
}

impl<T: ScpiTransport + ?Sized> Drop for FrozenAcquisition<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.resume() {
                log::warn!("Failed to resume acquisition: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTerminal;

    #[test]
    fn test_state_transitions() {
        let mut terminal = LoopbackTerminal::new();
        let mut controller = AcquisitionController::default();
        assert_eq!(controller.state(), AcquisitionState::Running);

        controller.stop(&mut terminal).unwrap();
        assert_eq!(controller.state(), AcquisitionState::Stopped);
        controller.run(&mut terminal).unwrap();
        assert_eq!(controller.state(), AcquisitionState::Running);
        controller.single(&mut terminal).unwrap();
        assert_eq!(controller.state(), AcquisitionState::Stopped);

        assert_eq!(terminal.sent(), [":STOP", ":RUN", ":SING"]);
    }

    #[test]
    fn test_frozen_body_success() {
        let mut terminal = LoopbackTerminal::new().reply("42");
        let mut controller = AcquisitionController::default();

        let value: Result<String, TerminalError> =
            controller.with_frozen_acquisition(&mut terminal, |t| t.query_text(":WAV:PRE?"));

        assert_eq!(value.unwrap(), "42");
        assert_eq!(controller.state(), AcquisitionState::Running);
        assert_eq!(terminal.sent(), [":STOP", ":WAV:PRE?", ":RUN"]);
    }

    #[test]
    fn test_frozen_body_failure_still_runs() {
        let mut terminal = LoopbackTerminal::new();
        let mut controller = AcquisitionController::default();

        let value: Result<String, TerminalError> =
            controller.with_frozen_acquisition(&mut terminal, |t| t.query_text(":WAV:PRE?"));

        assert!(matches!(value, Err(TerminalError::Timeout { .. })));
        assert_eq!(controller.state(), AcquisitionState::Running);
        assert_eq!(terminal.sent().last().map(String::as_str), Some(":RUN"));
    }

    #[test]
    fn test_body_error_wins_over_resume_error() {
        let mut terminal = LoopbackTerminal::new().fail_on(":RUN");
        let mut controller = AcquisitionController::default();

        let value: Result<(), TerminalError> =
            controller.with_frozen_acquisition(&mut terminal, |_| {
                Err(TerminalError::Timeout {
                    command: "body".to_string(),
                    received: String::new(),
                })
            });

        match value {
            Err(TerminalError::Timeout { command, .. }) => assert_eq!(command, "body"),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_resume_error_surfaces_on_success() {
        let mut terminal = LoopbackTerminal::new().fail_on(":RUN");
        let mut controller = AcquisitionController::default();

        let value: Result<(), TerminalError> =
            controller.with_frozen_acquisition(&mut terminal, |_| Ok(()));

        assert!(value.is_err());
        assert_eq!(controller.state(), AcquisitionState::Stopped);
    }

    #[test]
    fn test_stop_failure_skips_body() {
        let mut terminal = LoopbackTerminal::new().fail_on(":STOP");
        let mut controller = AcquisitionController::default();
        let mut ran = false;

        let value: Result<(), TerminalError> =
            controller.with_frozen_acquisition(&mut terminal, |_| {
                ran = true;
                Ok(())
            });

        assert!(value.is_err());
        assert!(!ran);
        assert_eq!(terminal.sent(), [":STOP"]);
    }

    #[test]
    fn test_dropped_guard_resumes() {
        let mut terminal = LoopbackTerminal::new();
        let mut controller = AcquisitionController::default();
        {
            let mut frozen = controller.freeze(&mut terminal).unwrap();
            frozen.write(":WAV:SOUR CHAN1").unwrap();
        }
        assert_eq!(controller.state(), AcquisitionState::Running);
        assert_eq!(terminal.sent(), [":STOP", ":WAV:SOUR CHAN1", ":RUN"]);
    }

    #[test]
    fn test_panicking_body_resumes() {
        let mut terminal = LoopbackTerminal::new();
        let mut controller = AcquisitionController::default();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), TerminalError> =
                controller.with_frozen_acquisition(&mut terminal, |_| panic!("body failed"));
        }));

        assert!(outcome.is_err());
        assert_eq!(terminal.sent(), [":STOP", ":RUN"]);
    }

    #[test]
    fn test_leave_stopped_policy() {
        let mut terminal = LoopbackTerminal::new();
        let mut controller = AcquisitionController::new(ResumePolicy::LeaveStopped);

        let value: Result<(), TerminalError> =
            controller.with_frozen_acquisition(&mut terminal, |_| Ok(()));

        assert!(value.is_ok());
        assert_eq!(controller.state(), AcquisitionState::Stopped);
        assert_eq!(terminal.sent(), [":STOP"]);
    }
}
