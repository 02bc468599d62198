mod error;
mod mutations;
pub mod queries;
#[cfg(test)]
mod tests;
mod validate;

pub use error::EngineError;
pub use queries::{PageInfo, PropertyFilter};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::mailer::Mailer;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<PropertyId, SharedPropertyState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) mailer: Arc<dyn Mailer>,
    /// Reverse lookup: booking id → property id.
    pub(super) booking_index: DashMap<BookingId, PropertyId>,
    pub(super) users: DashMap<UserId, User>,
    pub(super) usernames: DashMap<String, UserId>,
}

/// Apply an event directly to a PropertyState (no locking — caller holds the lock).
fn apply_to_property(ps: &mut PropertyState, event: &Event, index: &DashMap<BookingId, PropertyId>) {
    match event {
        Event::PropertyUpdated { property } => {
            ps.listing = property.clone();
        }
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.property_id);
            ps.bookings.push(booking.clone());
        }
        Event::BookingUpdated { booking } => {
            if let Some(slot) = ps.bookings.iter_mut().find(|b| b.id == booking.id) {
                *slot = booking.clone();
            }
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(slot) = ps.bookings.iter_mut().find(|b| b.id == *id) {
                slot.status = *status;
            }
        }
        Event::BookingDeleted { id, .. } => {
            ps.remove_booking(*id);
            index.remove(id);
        }
        Event::ReviewCreated { review } => {
            ps.reviews.push(review.clone());
        }
        // Handled at the DashMap level, not here.
        Event::UserRegistered { .. }
        | Event::PropertyCreated { .. }
        | Event::PropertyDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, mailer: Arc<dyn Mailer>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            mailer,
            booking_index: DashMap::new(),
            users: DashMap::new(),
            usernames: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds (no contention). blocking_write would panic here because
        // replay may run inside an async context.
        for event in &events {
            match event {
                Event::UserRegistered { user } => {
                    engine.usernames.insert(user.username.clone(), user.id);
                    engine.users.insert(user.id, user.clone());
                }
                Event::PropertyCreated { property } => {
                    let ps = PropertyState::new(property.clone());
                    engine
                        .state
                        .insert(property.id, Arc::new(RwLock::new(ps)));
                }
                Event::PropertyDeleted { id } => {
                    if let Some((_, ps)) = engine.state.remove(id) {
                        let guard = ps.try_read().expect("replay: uncontended read");
                        for booking in &guard.bookings {
                            engine.booking_index.remove(&booking.id);
                        }
                    }
                }
                other => {
                    if let Some(property_id) = other.property_id()
                        && let Some(entry) = engine.state.get(&property_id)
                    {
                        let ps = entry.value().clone();
                        let mut guard = ps.try_write().expect("replay: uncontended write");
                        apply_to_property(&mut guard, other, &engine.booking_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn property_state(&self, id: &PropertyId) -> Option<SharedPropertyState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn property_of_booking(&self, booking_id: &BookingId) -> Option<PropertyId> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        property_id: PropertyId,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_property(ps, event, &self.booking_index);
        self.notify.send(property_id, event);
        Ok(())
    }

    /// Lookup booking → property, get the property, acquire its write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &BookingId,
    ) -> Result<(PropertyId, tokio::sync::OwnedRwLockWriteGuard<PropertyState>), EngineError> {
        let property_id = self
            .property_of_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ps = self
            .property_state(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.write_owned().await;
        // Deleted while we waited for the lock.
        if !self.state.contains_key(&property_id) {
            return Err(EngineError::NotFound(property_id));
        }
        Ok((property_id, guard))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            events.push(Event::UserRegistered {
                user: entry.value().clone(),
            });
        }

        let property_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in property_ids {
            let Some(ps) = self.property_state(&id) else {
                continue;
            };
            let guard = ps.read().await;
            events.push(Event::PropertyCreated {
                property: guard.listing.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
            for review in &guard.reviews {
                events.push(Event::ReviewCreated {
                    review: review.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}
