//! Timer-driven auto-save snapshots.
//!
//! Each package owns at most one timer task. A tick asks the package for a
//! snapshot, which waits for the operation permit like any other save; a
//! snapshot is only written when content changed since the previous one.
//! Snapshots go to `{path}.autosave`, or to `{temp_dir}/{session}.autosave`
//! for a document that was never opened or saved.

use crate::content::ContentHandler;
use crate::package::{with_suffix, Package, PackageInner, SaveError};
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn, Instrument};

/// Stored schedule and the running timer.
#[derive(Default)]
pub(crate) struct AutoSaveState {
    due: Option<Duration>,
    period: Option<Duration>,
    enabled: bool,
    task: Option<JoinHandle<()>>,
}

impl AutoSaveState {
    pub(crate) fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<H: ContentHandler> PackageInner<H> {
    fn auto_save_state(&self) -> MutexGuard<'_, AutoSaveState> {
        self.auto_save.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn auto_save_enabled(&self) -> bool {
        self.auto_save_state().enabled
    }

    pub(crate) fn auto_save_path(&self) -> PathBuf {
        match &self.session().path {
            Some(path) => with_suffix(path, ".autosave"),
            None => std::env::temp_dir().join(format!("{}.autosave", self.session_id)),
        }
    }

    /// Start the timer with `first` as its initial delay. `None` never fires.
    fn arm(self: &Arc<Self>, auto_save: &mut AutoSaveState, first: Option<Duration>) {
        auto_save.disarm();
        let (true, Some(first)) = (auto_save.enabled, first) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Auto-save requested outside a tokio runtime, timer not started");
            return;
        };

        // A zero period means one-shot.
        let period = auto_save.period.filter(|p| !p.is_zero());
        let weak = Arc::downgrade(self);
        let timer = async move {
            let mut delay = first;
            loop {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match inner.save_snapshot(false).await {
                    Ok(written) => trace!(written, "Auto-save tick"),
                    Err(e) => warn!(error = %e, "Auto-save failed"),
                }
                drop(inner);

                match period {
                    Some(period) => delay = period,
                    None => break,
                }
            }
        };

        debug!(first = ?first, period = ?period, "Auto-save timer armed");
        auto_save.task = Some(runtime.spawn(timer.instrument(self.span.clone())));
    }
}

impl<H: ContentHandler> Package<H> {
    /// Configure the auto-save timer.
    ///
    /// `due` is the delay before the first tick and `period` the interval after
    /// it; `None` means never (for `period`: a single tick). A zero `due` writes
    /// a snapshot right away, ignoring `enable`, and then waits `period` for
    /// the first timer tick. The error of that immediate snapshot is returned;
    /// the timer is armed either way.
    pub async fn configure_auto_save(
        &self,
        due: Option<Duration>,
        period: Option<Duration>,
        enable: bool,
    ) -> Result<(), SaveError> {
        {
            let mut auto_save = self.inner.auto_save_state();
            auto_save.due = due;
            auto_save.period = period;
            auto_save.enabled = enable;
            auto_save.disarm();
        }

        let mut first = due;
        let mut result = Ok(());
        if due == Some(Duration::ZERO) {
            result = self
                .inner
                .save_snapshot(true)
                .instrument(self.inner.span.clone())
                .await
                .map(|_| ());
            first = period;
        }

        let mut auto_save = self.inner.auto_save_state();
        self.inner.arm(&mut auto_save, first);
        result
    }

    /// Arm or disarm the timer, keeping the configured schedule.
    pub fn set_auto_save_enabled(&self, enabled: bool) {
        let mut auto_save = self.inner.auto_save_state();
        auto_save.enabled = enabled;
        let due = auto_save.due;
        self.inner.arm(&mut auto_save, due);
    }

    pub fn auto_save_enabled(&self) -> bool {
        self.inner.auto_save_enabled()
    }

    /// Configured `(due, period)`.
    pub fn auto_save_schedule(&self) -> (Option<Duration>, Option<Duration>) {
        let auto_save = self.inner.auto_save_state();
        (auto_save.due, auto_save.period)
    }

    /// Where the next snapshot will be written.
    pub fn auto_save_path(&self) -> PathBuf {
        self.inner.auto_save_path()
    }

    /// Write a snapshot now if content changed since the last one.
    pub async fn auto_save_now(&self) -> Result<bool, SaveError> {
        self.inner
            .save_snapshot(true)
            .instrument(self.inner.span.clone())
            .await
    }
}
