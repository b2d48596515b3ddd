//! The render loop.
//!
//! Each render runs inside a tracking session. The session's will-change
//! callback posts the [`ChangeEvent`] to a channel; the loop drains the
//! channel after every mutation and re-renders only when something arrived.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};

use perception::{Callbacks, ChangeEvent, Perceptible, TrackingSession, track_session};
use tracing::{debug, info};

use crate::cli::RenderMode;
use crate::error::Result;
use crate::model::CounterModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoConfig {
    pub steps: u32,
    pub mode: RenderMode,
    pub equality_gated: bool,
}

/// What a run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Frames rendered, including the first.
    pub renders: u32,
    /// Change events delivered by tracking sessions.
    pub notifications: u32,
    /// Writes dropped by equality gating.
    pub skipped_writes: u32,
}

pub struct App {
    config: DemoConfig,
    model: CounterModel,
    events_tx: Sender<ChangeEvent>,
    events_rx: Receiver<ChangeEvent>,
    session: Option<TrackingSession>,
    summary: Summary,
}

impl App {
    #[must_use]
    pub fn new(config: DemoConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            model: CounterModel::default(),
            events_tx,
            events_rx,
            session: None,
            summary: Summary::default(),
        }
    }

    pub fn run(&mut self, out: &mut impl Write) -> Result<Summary> {
        self.render(out)?;
        for step in 0..self.config.steps {
            self.apply(step);
            let mut dirty = false;
            while let Ok(event) = self.events_rx.try_recv() {
                debug_assert!(self.model.raised(&event));
                debug!(step, key = event.key().name(), "view invalidated");
                self.summary.notifications += 1;
                dirty = true;
            }
            if dirty {
                self.render(out)?;
            }
        }
        if let Some(session) = self.session.take() {
            session.cancel();
        }
        info!(
            renders = self.summary.renders,
            notifications = self.summary.notifications,
            skipped_writes = self.summary.skipped_writes,
            "run complete"
        );
        Ok(self.summary)
    }

    /// Even steps write `count`, odd steps write `name`. Values repeat in
    /// pairs of writes so equality gating has something to skip.
    fn apply(&mut self, step: u32) {
        let generation = i64::from(step / 4);
        let applied = if step % 2 == 0 {
            if self.config.equality_gated {
                self.model.set_count_if_changed(generation)
            } else {
                self.model.set_count(generation);
                true
            }
        } else {
            let name = format!("n{generation}");
            if self.config.equality_gated {
                self.model.set_name_if_changed(name)
            } else {
                self.model.set_name(name);
                true
            }
        };
        if !applied {
            self.summary.skipped_writes += 1;
        }
    }

    fn render(&mut self, out: &mut impl Write) -> Result<()> {
        let events = self.events_tx.clone();
        let model = &self.model;
        let mode = self.config.mode;
        let (frame, session) = track_session(
            || match mode {
                RenderMode::Count => format!("count={}", model.count()),
                RenderMode::Name => format!("name={:?}", model.name()),
                RenderMode::Both => format!("count={} name={:?}", model.count(), model.name()),
            },
            Callbacks::new().will_change(move |event| {
                let _ = events.send(event);
            }),
        )?;
        self.summary.renders += 1;
        writeln!(out, "render #{}: {frame}", self.summary.renders)?;
        self.session = Some(session);
        Ok(())
    }
}
