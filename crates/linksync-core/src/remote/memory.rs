//! Loopback remote authority.
//!
//! Keeps just enough server state to assign ids, check references, cascade
//! deletions and replay history: the structural links between entities, an
//! ordered log of non-deletion events and a list of tombstones. Every
//! accepted change is pushed to all live subscribers, the sender included.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChangeEvent, RemoteRequest, RemoteResponse, RemoteTransport, Tombstone};
use crate::context::Correlation;
use crate::error::RemoteError;
use crate::operation::{EventClass, Operation};
use crate::types::{self, EntityKind, RemoteId, Timestamp};

/// First id handed out is `FIRST_REMOTE_ID + 1`.
const FIRST_REMOTE_ID: i64 = 500;

/// Structural state of one server-side entity
#[derive(Debug, Clone, Copy)]
enum Node {
    Folder { parent: Option<RemoteId> },
    Link { folder: Option<RemoteId> },
    Tag,
    Panel,
    PanelFolder { panel: RemoteId, folder: RemoteId },
}

struct ServerState {
    online: bool,
    fail_next: usize,
    last_id: i64,
    clock: Timestamp,
    nodes: BTreeMap<(EntityKind, RemoteId), Node>,
    log: Vec<ChangeEvent>,
    tombstones: Vec<Tombstone>,
    subscribers: Vec<mpsc::Sender<ChangeEvent>>,
}

impl ServerState {
    fn tick(&mut self) -> Timestamp {
        self.clock = types::now().max(self.clock + 1);
        self.clock
    }

    fn exists(&self, kind: EntityKind, id: RemoteId) -> bool {
        self.nodes.contains_key(&(kind, id))
    }

    fn folder_parent(&self, id: RemoteId) -> Option<RemoteId> {
        match self.nodes.get(&(EntityKind::Folder, id)) {
            Some(Node::Folder { parent }) => *parent,
            _ => None,
        }
    }

    /// Whether `candidate` is `folder` or lies beneath it.
    fn within(&self, folder: RemoteId, candidate: RemoteId) -> bool {
        let mut cursor = Some(candidate);
        while let Some(current) = cursor {
            if current == folder {
                return true;
            }
            cursor = self.folder_parent(current);
        }
        false
    }

    fn check(&self, op: &Operation<RemoteId>) -> Result<(), RemoteError> {
        let targets = op.targets();
        for (kind, id) in &targets {
            if !self.exists(*kind, *id) {
                return Err(RemoteError::Gone {
                    kind: *kind,
                    id: *id,
                });
            }
        }

        let mut missing = None;
        let _ = op.clone().map_ids(|kind, id| {
            if missing.is_none() && !targets.contains(&(kind, id)) && !self.exists(kind, id) {
                missing = Some((kind, id));
            }
            id
        });
        if let Some((kind, id)) = missing {
            return Err(RemoteError::Rejected(format!(
                "{} {} does not exist",
                kind, id
            )));
        }

        match op {
            Operation::MoveFolder {
                id,
                parent: Some(parent),
            } if self.within(*id, *parent) => Err(RemoteError::Rejected(format!(
                "moving folder {} under {} would create a cycle",
                id, parent
            ))),
            Operation::MoveMany {
                selection,
                target: Some(target),
            } if selection.folders.iter().any(|f| self.within(*f, *target)) => Err(
                RemoteError::Rejected(format!("moving into {} would create a cycle", target)),
            ),
            Operation::AddPanelFolder { panel, folder, .. } => {
                let attached = self.nodes.values().any(|node| {
                    matches!(
                        node,
                        Node::PanelFolder { panel: p, folder: f } if p == panel && f == folder
                    )
                });
                if attached {
                    Err(RemoteError::Rejected(format!(
                        "folder {} already attached to panel {}",
                        folder, panel
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn allocate(&mut self) -> RemoteId {
        self.last_id += 1;
        RemoteId(self.last_id)
    }

    /// Apply a checked operation; returns the created id and removed entities.
    fn apply(
        &mut self,
        op: &Operation<RemoteId>,
    ) -> (Option<RemoteId>, Vec<(EntityKind, RemoteId)>) {
        let created = op.created_kind().map(|kind| {
            let id = self.allocate();
            let node = match op {
                Operation::CreateFolder { folder, .. } => Node::Folder {
                    parent: folder.parent,
                },
                Operation::CreateLink { link, .. } => Node::Link {
                    folder: link.scope.folder().copied(),
                },
                Operation::AddPanelFolder { panel, folder, .. } => Node::PanelFolder {
                    panel: *panel,
                    folder: *folder,
                },
                _ if kind == EntityKind::Tag => Node::Tag,
                _ => Node::Panel,
            };
            self.nodes.insert((kind, id), node);
            id
        });

        match op {
            Operation::MoveFolder { id, parent } => {
                self.nodes
                    .insert((EntityKind::Folder, *id), Node::Folder { parent: *parent });
            }
            Operation::MoveLink { id, scope } => {
                self.nodes.insert(
                    (EntityKind::Link, *id),
                    Node::Link {
                        folder: scope.folder().copied(),
                    },
                );
            }
            Operation::MoveMany { selection, target } => {
                for folder in &selection.folders {
                    self.nodes
                        .insert((EntityKind::Folder, *folder), Node::Folder { parent: *target });
                }
                for link in &selection.links {
                    self.nodes
                        .insert((EntityKind::Link, *link), Node::Link { folder: *target });
                }
            }
            _ => {}
        }

        let removed = if op.class() == EventClass::Delete {
            self.cascade(op.targets())
        } else {
            Vec::new()
        };
        (created, removed)
    }

    fn cascade(&mut self, roots: Vec<(EntityKind, RemoteId)>) -> Vec<(EntityKind, RemoteId)> {
        let mut removed = Vec::new();
        let mut stack = roots;
        while let Some((kind, id)) = stack.pop() {
            if self.nodes.remove(&(kind, id)).is_none() {
                continue;
            }
            removed.push((kind, id));
            for (key, node) in &self.nodes {
                let dependent = match (kind, node) {
                    (EntityKind::Folder, Node::Folder { parent }) => *parent == Some(id),
                    (EntityKind::Folder, Node::Link { folder }) => *folder == Some(id),
                    (EntityKind::Folder, Node::PanelFolder { folder, .. }) => *folder == id,
                    (EntityKind::Panel, Node::PanelFolder { panel, .. }) => *panel == id,
                    _ => false,
                };
                if dependent {
                    stack.push(*key);
                }
            }
        }
        removed
    }

    fn broadcast(&mut self, event: &ChangeEvent) {
        self.subscribers.retain(|tx| !tx.is_closed());
        for tx in &self.subscribers {
            if tx.try_send(event.clone()).is_err() {
                warn!(kind = %event.kind(), "Subscriber lagging, dropped live event");
            }
        }
    }

    fn accept(
        &mut self,
        operation: Operation<RemoteId>,
        correlation: Correlation,
    ) -> Result<RemoteResponse, RemoteError> {
        self.check(&operation)?;
        let event_timestamp = self.tick();
        let (created, removed) = self.apply(&operation);
        let operation = match created {
            Some(id) => operation.with_subject(id),
            None => operation,
        };

        for (kind, remote_id) in removed {
            self.tombstones.push(Tombstone {
                kind,
                remote_id,
                deleted_at: event_timestamp,
                correlation: correlation.clone(),
            });
        }

        let event = ChangeEvent {
            operation,
            correlation,
            event_timestamp,
        };
        if event.operation.class() != EventClass::Delete {
            self.log.push(event.clone());
        }
        debug!(
            kind = %event.kind(),
            event_timestamp,
            client = %event.correlation.display_name,
            "Remote accepted change"
        );
        self.broadcast(&event);

        Ok(RemoteResponse {
            remote_id: created,
            event_timestamp,
        })
    }
}

/// An in-process remote authority shared by any number of clients
pub struct InMemoryRemote {
    state: Mutex<ServerState>,
    subscription_capacity: usize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Remote whose live subscriptions buffer at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ServerState {
                online: true,
                fail_next: 0,
                last_id: FIRST_REMOTE_ID,
                clock: 0,
                nodes: BTreeMap::new(),
                log: Vec::new(),
                tombstones: Vec::new(),
                subscribers: Vec::new(),
            }),
            subscription_capacity: capacity.max(1),
        }
    }

    /// Take the remote offline or back online. Going offline closes every
    /// live subscription.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state.lock();
        state.online = online;
        if !online {
            state.subscribers.clear();
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Fail the next `n` requests with a timeout.
    pub fn fail_next_requests(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Apply a change on behalf of some other client, regardless of
    /// connectivity.
    pub fn inject(
        &self,
        operation: Operation<RemoteId>,
        correlation: Correlation,
    ) -> Result<RemoteResponse, RemoteError> {
        self.state.lock().accept(operation, correlation)
    }

    pub fn exists(&self, kind: EntityKind, id: RemoteId) -> bool {
        self.state.lock().exists(kind, id)
    }

    /// Live ids of a kind, ascending.
    pub fn ids(&self, kind: EntityKind) -> Vec<RemoteId> {
        self.state
            .lock()
            .nodes
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().log.len()
    }

    fn admit(state: &mut ServerState) -> Result<(), RemoteError> {
        if !state.online {
            return Err(RemoteError::Network("remote offline".into()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(RemoteError::Timeout);
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTransport for InMemoryRemote {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let mut state = self.state.lock();
        Self::admit(&mut state)?;
        state.accept(request.operation, request.correlation)
    }

    async fn fetch_updates(&self, since: Timestamp) -> Result<Vec<ChangeEvent>, RemoteError> {
        let mut state = self.state.lock();
        Self::admit(&mut state)?;
        Ok(state
            .log
            .iter()
            .filter(|e| e.event_timestamp > since)
            .cloned()
            .collect())
    }

    async fn fetch_tombstones(&self, since: Timestamp) -> Result<Vec<Tombstone>, RemoteError> {
        let mut state = self.state.lock();
        Self::admit(&mut state)?;
        Ok(state
            .tombstones
            .iter()
            .filter(|t| t.deleted_at > since)
            .cloned()
            .collect())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ChangeEvent>, RemoteError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(RemoteError::Network("remote offline".into()));
        }
        let (tx, rx) = mpsc::channel(self.subscription_capacity);
        state.subscribers.push(tx);
        Ok(rx)
    }
}
