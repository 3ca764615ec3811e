//! Response routing.
//!
//! Every received line is classified, parsed and applied to the status store
//! before it is broadcast, so a caller woken by its reply already sees the
//! updated status.

use chrono::Local;
use tokio::sync::mpsc;

use crate::dispatch::CommandQueue;
use crate::error::{Error, ParseError};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{
    ResponseTag, parse_autosampler_config, parse_autosampler_status, parse_move_report,
    parse_pump_info, parse_pump_status, parse_rtc_time,
};
use crate::status::StatusStore;
use crate::types::DeviceKind;

/// Applies received lines to a session's status.
pub(crate) struct Router {
    kind: DeviceKind,
    status: StatusStore,
    events: EventDispatcher,
    requery: CommandQueue,
}

impl Router {
    pub(crate) const fn new(
        kind: DeviceKind,
        status: StatusStore,
        events: EventDispatcher,
        requery: CommandQueue,
    ) -> Self {
        Self {
            kind,
            status,
            events,
            requery,
        }
    }

    /// Routes lines until the read loop stops.
    pub(crate) async fn run(self, mut line_rx: mpsc::Receiver<String>) {
        while let Some(line) = line_rx.recv().await {
            self.route(line).await;
        }
        tracing::debug!("{} router stopped", self.kind);
    }

    /// Classifies, applies and broadcasts one line.
    pub(crate) async fn route(&self, line: String) {
        let tag = ResponseTag::classify(&line);
        if let Err(e) = self.apply(tag, &line).await {
            tracing::warn!("{} {} line ignored: {} ({})", self.kind, tag.name(), e, line);
        }
        self.events.dispatch(Event::Line { tag, text: line });
    }

    async fn apply(&self, tag: ResponseTag, line: &str) -> Result<(), ParseError> {
        match tag {
            ResponseTag::AutosamplerConfig => {
                let slots = parse_autosampler_config(line)?;
                let names = self
                    .status
                    .update(|s| {
                        s.set_slots(slots);
                        s.slots.clone()
                    })
                    .await;
                tracing::info!("slots populated: {:?}", names);
            }
            ResponseTag::PumpInfo => {
                let pumps = parse_pump_info(line)?;
                tracing::debug!("pump configuration: {} pumps", pumps.len());
                self.status.update(|s| s.pumps = pumps).await;
            }
            ResponseTag::AutosamplerStatus => {
                let state = parse_autosampler_status(line)?;
                tracing::debug!(
                    "autosampler at position {}, direction {}",
                    state.position,
                    state.direction
                );
                self.status
                    .update(|s| {
                        s.position = Some(state.position);
                        s.direction = Some(state.direction);
                    })
                    .await;
            }
            ResponseTag::PumpStatus => {
                let states = parse_pump_status(line)?;
                let unknown = self
                    .status
                    .update(|s| {
                        let mut unknown = Vec::new();
                        for (id, state) in states {
                            match s.pumps.get_mut(&id) {
                                Some(pump) => {
                                    pump.power = state.power;
                                    pump.direction = state.direction;
                                }
                                None => unknown.push(id),
                            }
                        }
                        unknown
                    })
                    .await;
                if !unknown.is_empty() {
                    self.requery_configuration(Error::Consistency { ids: unknown });
                }
            }
            ResponseTag::MoveReport => {
                let report = parse_move_report(line)?;
                tracing::info!(
                    "moved to position {} in {}s",
                    report.position,
                    report.seconds
                );
                self.status.update(|s| s.position = Some(report.position)).await;
            }
            ResponseTag::RtcTime => {
                let rtc = parse_rtc_time(line)?;
                let offset = rtc - Local::now().naive_local();
                tracing::trace!(
                    "{} RTC time {} (offset {}ms)",
                    self.kind,
                    rtc,
                    offset.num_milliseconds()
                );
                self.status
                    .update(|s| {
                        s.rtc_time = Some(rtc);
                        s.rtc_offset = Some(offset);
                    })
                    .await;
            }
            ResponseTag::Success => tracing::debug!("{}: {}", self.kind, line),
            ResponseTag::Error => tracing::warn!("{} reported: {}", self.kind, line),
            ResponseTag::Identity | ResponseTag::Unknown => {
                tracing::debug!("{} unhandled {} line: {}", self.kind, tag.name(), line);
            }
        }
        Ok(())
    }

    /// Schedules one configuration query to repair the status.
    fn requery_configuration(&self, cause: Error) {
        tracing::warn!("{}: {}, re-querying configuration", self.kind, cause);
        if let Err(e) = self.requery.enqueue(self.kind.configuration_query()) {
            tracing::debug!("configuration re-query not queued: {}", e);
        }
    }
}
