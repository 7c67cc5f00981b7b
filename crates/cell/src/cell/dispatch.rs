use std::sync::Arc;

use glam::Vec3;

use crate::entity::{decode_values, encode_values, PropertyValue};
use crate::error::CellError;
use crate::net::{CallResult, CellMessage, Envelope, ReplyHandle};
use crate::script::Caller;
use crate::types::{CallId, Direction3D, EntityId, MethodId, ProcessId};

use super::{CellApp, CellEvent};

/// Result of a method call issued on this process.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// Ran here; the values are the method's return values.
    Completed(Vec<PropertyValue>),
    /// Sent on or held back; the result arrives later as a `CellEvent::CallReply`.
    Forwarded(CallId),
}

impl CellApp {
    /// Applies one message from another process (or from this one, for replayed messages).
    pub fn receive(&mut self, envelope: Envelope) {
        self.stats.messages_in += 1;
        let from = envelope.from;
        log::trace!("process {} <- {}: {}", self.id, from, envelope.message.name());
        let Some(message) = self.hold_if_frozen(envelope.message) else {
            return;
        };
        match message {
            CellMessage::RemoteMethodCall {
                entity,
                method,
                caller,
                args,
                reply,
            } => self.on_remote_method_call(entity, method, caller, &args, reply),
            CellMessage::RemoteCallReply { call, result } => self.on_call_reply(call, result),
            CellMessage::GhostPropertyUpdate {
                entity,
                property,
                value,
            } => {
                if let Err(err) = self.on_ghost_property_update(entity, property, &value) {
                    log::debug!("ghost property update dropped: {}", err);
                }
            }
            CellMessage::GhostVolatileUpdate {
                entity,
                position,
                direction,
                on_ground,
            } => self.on_ghost_volatile_update(
                entity,
                Vec3::from_array(position),
                Direction3D::from_array(direction),
                on_ground,
            ),
            CellMessage::CreateGhost { snapshot } => self.on_create_ghost(from, snapshot),
            CellMessage::DestroyGhost { entity } => self.on_destroy_ghost(entity),
            CellMessage::GhostOwnerChanged { entity, owner } => {
                self.on_ghost_owner_changed(entity, owner)
            }
            CellMessage::TeleportRequest {
                source_space,
                snapshot,
            } => self.on_teleport_request(from, source_space, snapshot),
            CellMessage::TeleportAck { entity } => self.on_teleport_ack(from, entity),
            CellMessage::TeleportReject { entity, reason } => {
                self.on_teleport_reject(from, entity, reason)
            }
            CellMessage::TeleportCommit {
                source_space,
                snapshot,
            } => self.on_teleport_commit(from, source_space, snapshot),
            CellMessage::TeleportAbort { entity } => self.on_teleport_abort(from, entity),
            CellMessage::ClientUpdate {
                entity,
                from: client,
                position,
                direction,
                on_ground,
            } => {
                let result = self.on_update_from_client(
                    entity,
                    client,
                    Vec3::from_array(position),
                    Direction3D::from_array(direction),
                    on_ground,
                );
                if let Err(err) = result {
                    log::warn!("client update for entity {} dropped: {}", entity, err);
                }
            }
        }
    }

    /// Calls `method` on `entity` wherever its real lives.
    pub fn call_method(
        &mut self,
        entity: EntityId,
        method: MethodId,
        caller: Caller,
        args: Vec<PropertyValue>,
    ) -> Result<CallOutcome, CellError> {
        match self.arena.get(entity) {
            Some(target) if target.is_real() && !target.is_migrating() => {
                let result = self.execute_method(entity, method, caller, args)?;
                Ok(CallOutcome::Completed(result))
            }
            Some(target) if target.is_real() => {
                let call = self.allocate_call();
                let message = CellMessage::RemoteMethodCall {
                    entity,
                    method,
                    caller,
                    args: encode_values(&args)?,
                    reply: Some(ReplyHandle {
                        process: self.id,
                        call,
                    }),
                };
                if self.migration.buffer(entity, message).is_err() {
                    log::warn!("entity {} flagged migrating without a migration", entity);
                }
                Ok(CallOutcome::Forwarded(call))
            }
            Some(target) => {
                let owner = target.ghost_owner().ok_or(CellError::NotReal(entity))?;
                let exposed = self
                    .defs
                    .get(target.type_id)
                    .and_then(|def| def.method(method))
                    .ok_or(CellError::UnknownMethod { entity, method })?
                    .exposed;
                if !exposed {
                    return Err(CellError::MethodNotExposed { entity, method });
                }
                self.forward_call(owner, entity, method, caller, encode_values(&args)?)
            }
            None => {
                let owner = self
                    .router
                    .resolve(entity, self.tick, self.directory.as_ref())
                    .inspect_err(|err| log::warn!("call to entity {} dropped: {}", entity, err))?;
                self.forward_call(owner, entity, method, caller, encode_values(&args)?)
            }
        }
    }

    fn forward_call(
        &mut self,
        owner: ProcessId,
        entity: EntityId,
        method: MethodId,
        caller: Caller,
        args: Vec<u8>,
    ) -> Result<CallOutcome, CellError> {
        let call = self.allocate_call();
        self.send(
            owner,
            CellMessage::RemoteMethodCall {
                entity,
                method,
                caller,
                args,
                reply: Some(ReplyHandle {
                    process: self.id,
                    call,
                }),
            },
        );
        Ok(CallOutcome::Forwarded(call))
    }

    /// Runs a method on a local real entity.
    fn execute_method(
        &mut self,
        entity: EntityId,
        method: MethodId,
        caller: Caller,
        args: Vec<PropertyValue>,
    ) -> Result<Vec<PropertyValue>, CellError> {
        let defs = Arc::clone(&self.defs);
        let target = self
            .arena
            .get_real(entity)
            .ok_or(CellError::EntityNotFound(entity))?;
        let def = defs
            .get(target.type_id)
            .and_then(|def| def.method(method))
            .ok_or(CellError::UnknownMethod { entity, method })?;
        if caller.is_client() && !def.exposed {
            return Err(CellError::MethodNotExposed { entity, method });
        }
        let effects = self.script.call_method(target, def, caller, &args);
        Ok(self.apply_effects(entity, effects).unwrap_or_default())
    }

    /// Entry point for calls arriving from other processes. Calls for a ghost go on to its
    /// real if the method is exposed.
    fn on_remote_method_call(
        &mut self,
        entity: EntityId,
        method: MethodId,
        caller: Caller,
        args: &[u8],
        reply: Option<ReplyHandle>,
    ) {
        let (is_real, ghost_owner, type_id) = match self.arena.get(entity) {
            Some(target) => (target.is_real(), target.ghost_owner(), Some(target.type_id)),
            None => (false, None, None),
        };

        if is_real {
            let result = decode_values(args)
                .map_err(CellError::from)
                .and_then(|args| self.execute_method(entity, method, caller, args))
                .and_then(|values| Ok(encode_values(&values)?));
            let result = match result {
                Ok(bytes) => CallResult::Returned(bytes),
                Err(err) => {
                    log::warn!("call {} on entity {} failed: {}", method, entity, err);
                    CallResult::Failed(err.to_string())
                }
            };
            self.reply(reply, result);
            return;
        }

        if let Some(owner) = ghost_owner {
            let exposed = type_id
                .and_then(|type_id| self.defs.get(type_id))
                .and_then(|def| def.method(method))
                .is_some_and(|def| def.exposed);
            if !exposed {
                let err = CellError::MethodNotExposed { entity, method };
                log::warn!("{}", err);
                self.reply(reply, CallResult::Failed(err.to_string()));
                return;
            }
            self.send(
                owner,
                CellMessage::RemoteMethodCall {
                    entity,
                    method,
                    caller,
                    args: args.to_vec(),
                    reply,
                },
            );
            return;
        }

        match self
            .router
            .resolve(entity, self.tick, self.directory.as_ref())
        {
            Ok(owner) => self.send(
                owner,
                CellMessage::RemoteMethodCall {
                    entity,
                    method,
                    caller,
                    args: args.to_vec(),
                    reply,
                },
            ),
            Err(err) => {
                log::warn!("call {} dropped: {}", method, err);
                self.reply(reply, CallResult::Failed(err.to_string()));
            }
        }
    }

    /// Holds messages for a real frozen by an outgoing migration; they are replayed or
    /// forwarded once the migration ends. Anything else is handed back.
    fn hold_if_frozen(&mut self, message: CellMessage) -> Option<CellMessage> {
        let Some(entity) = message.bufferable_target() else {
            return Some(message);
        };
        if !self
            .arena
            .get(entity)
            .is_some_and(|e| e.is_real() && e.is_migrating())
        {
            return Some(message);
        }
        if self.migration.buffer(entity, message).is_err() {
            log::warn!("entity {} flagged migrating without a migration", entity);
        }
        None
    }

    fn reply(&mut self, reply: Option<ReplyHandle>, result: CallResult) {
        if let Some(handle) = reply {
            self.send(
                handle.process,
                CellMessage::RemoteCallReply {
                    call: handle.call,
                    result,
                },
            );
        }
    }

    fn on_call_reply(&mut self, call: CallId, result: CallResult) {
        let result = match result {
            CallResult::Returned(bytes) => decode_values(&bytes).map_err(|err| err.to_string()),
            CallResult::Failed(reason) => Err(reason),
        };
        self.emit(CellEvent::CallReply { call, result });
    }

    /// Movement reported by the client that controls `entity`. Updates from anyone else are
    /// ignored; moves beyond the top speed are answered with a forced position.
    pub fn on_update_from_client(
        &mut self,
        entity: EntityId,
        from: EntityId,
        position: Vec3,
        direction: Direction3D,
        on_ground: bool,
    ) -> Result<(), CellError> {
        let message = CellMessage::ClientUpdate {
            entity,
            from,
            position: position.to_array(),
            direction: direction.to_array(),
            on_ground,
        };
        let Some(message) = self.hold_if_frozen(message) else {
            return Ok(());
        };
        let target = match self.arena.get(entity) {
            Some(target) => target,
            None => {
                let owner = self
                    .router
                    .resolve(entity, self.tick, self.directory.as_ref())?;
                self.send(owner, message);
                return Ok(());
            }
        };
        if let Some(owner) = target.ghost_owner() {
            self.send(owner, message);
            return Ok(());
        }
        if target.controlled_by != Some(from) {
            log::debug!(
                "entity {} ignored a move from {} which does not control it",
                entity,
                from
            );
            return Ok(());
        }

        let accepted = target.check_move_for_top_speed(position);
        let space = target.space_id;
        let Some(target) = self.arena.get_mut(entity) else {
            return Ok(());
        };
        target.set_direction(direction);
        target.on_ground = on_ground;
        if accepted {
            target.set_position(position);
            if let Some(space) = self.spaces.get_mut(space) {
                space.move_entity(entity, position);
            }
        } else {
            log::info!("entity {} moved faster than its top speed", entity);
            self.force_position(from, entity);
        }
        Ok(())
    }
}
