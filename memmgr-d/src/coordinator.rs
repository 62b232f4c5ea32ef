// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! The coordinator: owner of all segment, generation and reader state.
//!
//! Everything here runs on one thread. Bus traffic and builder wake-ups
//! arrive as [`Event`]s on a single channel; handlers mutate the state and
//! push builder commands or reader messages out. The builder thread is the
//! only other thread and talks exclusively through the builder channel.

use crate::builder::{self, MappedFiles};
use crate::builder_channel::{BuilderChannel, Command, Notification};
use crate::bus::{Bus, Event};
use crate::config::{check_mapped_file_dir, ConfigParams, DEFAULT_MAPPED_FILE_DIR};
use crate::datasrc_clients::DataSrcClientsMgr;
use crate::datasrc_info::{DataSrcInfo, SegmentKey};
use crate::reader_registry::{AckOutcome, ReaderRegistry};
use crate::segment_info::{ResetKind, SegmentEvent};
use anyhow::{bail, Context};
use memmgr_proto::message::{
    create_answer, create_command, MemberEvent, ReleaseSegmentsAck, SegmentInfoUpdateAck,
    ZoneRequest, RELEASE_SEGMENTS, SEGMENT_INFO_UPDATE, SEGMENT_READER_GROUP,
};
use memmgr_proto::{GenerationId, Name, NameError, ReaderId, RrClass};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info};

/// Notification group carrying `zone_updated`.
const ZONE_UPDATE_GROUP: &str = "ZoneUpdateListener";

/// Notification group carrying bus membership events.
const MEMBERS_GROUP: &str = "cc_members";

/// Remote configuration module describing the data sources.
const DATA_SOURCES_MODULE: &str = "data_sources";

/// Bus core group answering the membership enumeration RPC.
const BUS_CORE_GROUP: &str = "Msgq";

/// Rejection of a zone load request. The display string becomes the answer
/// text on the `loadzone` path; the notification path only logs it.
#[derive(Debug, Error)]
pub enum ZoneLoadError {
    #[error("data sources are not configured yet")]
    NoDataSources,
    #[error("missing mandatory argument '{0}'")]
    MissingArg(&'static str),
    #[error("unknown DNS class '{0}'")]
    BadClass(String),
    #[error("bad zone origin '{0}': {1}")]
    BadOrigin(String, NameError),
    #[error("data source {0}/{1} has no mapped segment")]
    UnknownDataSource(RrClass, String),
}

pub struct Coordinator<B: Bus> {
    bus: B,
    builder: Arc<BuilderChannel>,
    builder_thread: Option<JoinHandle<()>>,
    config: Option<ConfigParams>,
    clients_mgr: DataSrcClientsMgr,
    datasrc_info: Option<DataSrcInfo>,
    old_datasrc_info: BTreeMap<GenerationId, DataSrcInfo>,
    readers: ReaderRegistry,
}

impl<B: Bus> Coordinator<B> {
    pub fn new(bus: B, builder: Arc<BuilderChannel>) -> Self {
        Coordinator {
            bus,
            builder,
            builder_thread: None,
            config: None,
            clients_mgr: DataSrcClientsMgr::default(),
            datasrc_info: None,
            old_datasrc_info: BTreeMap::new(),
            readers: ReaderRegistry::default(),
        }
    }

    /// Apply a (re)configuration of the manager itself. The previous
    /// configuration stays in force when the new one is rejected.
    pub fn config_handler(&mut self, new_config: &Value) -> Value {
        let dir = match new_config.get("mapped_file_dir") {
            Some(value) => match value.as_str() {
                Some(dir) => PathBuf::from(dir),
                None => return create_answer(1, Some("mapped_file_dir is not a string")),
            },
            None => self
                .config
                .as_ref()
                .map(|params| params.mapped_file_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPED_FILE_DIR)),
        };
        if let Err(e) = check_mapped_file_dir(&dir) {
            error!("configuration rejected: {e}");
            return create_answer(1, Some(&e.to_string()));
        }
        self.config = Some(ConfigParams {
            mapped_file_dir: dir,
        });
        create_answer(0, None)
    }

    /// Bring the module up. The order is load-bearing: the builder must
    /// exist before the first segment commands, the membership subscription
    /// must precede the member enumeration so no subscribe event is lost.
    pub fn setup(&mut self) -> anyhow::Result<()> {
        if self.config.is_none() {
            bail!("initial configuration has not been established");
        }

        self.spawn_builder()
            .context("spawning the segment builder thread")?;

        let datasrc_config = self
            .bus
            .add_remote_config(DATA_SOURCES_MODULE)
            .context("subscribing to the data_sources configuration")?;
        self.datasrc_config_handler(&datasrc_config);
        if self.datasrc_info.is_none() {
            bail!("no data source configuration is available");
        }

        self.bus
            .subscribe_notification(ZONE_UPDATE_GROUP)
            .context("subscribing to zone update notifications")?;
        self.bus
            .subscribe_notification(MEMBERS_GROUP)
            .context("subscribing to membership notifications")?;

        let members = self
            .bus
            .rpc("members", BUS_CORE_GROUP, json!({ "group": SEGMENT_READER_GROUP }))
            .context("enumerating current segment readers")?;
        for member in members {
            match member.as_str() {
                Some(reader) => self.reader_subscribed(ReaderId::from(reader)),
                None => debug!("ignoring non-string member entry {member}"),
            }
        }
        Ok(())
    }

    fn spawn_builder(&mut self) -> std::io::Result<()> {
        let channel = Arc::clone(&self.builder);
        let handle = thread::Builder::new()
            .name("segment-builder".to_string())
            .spawn(move || builder::run(channel, MappedFiles))?;
        self.builder_thread = Some(handle);
        Ok(())
    }

    /// Process events until shutdown, then stop the builder.
    pub fn run(&mut self, events: &Receiver<Event>) {
        info!("memory manager event loop running");
        loop {
            match events.recv() {
                Ok(Event::BuilderWake) => self.notify_from_builder(),
                Ok(Event::Notification {
                    group,
                    event,
                    params,
                }) => match group.as_str() {
                    ZONE_UPDATE_GROUP => self.zone_update_notification(&event, &params),
                    MEMBERS_GROUP => self.reader_notification(&event, &params),
                    other => debug!("notification from unhandled group '{other}'"),
                },
                Ok(Event::ModCommand {
                    name,
                    params,
                    reply,
                }) => {
                    let answer = self.mod_command_handler(&name, &params);
                    let _ = reply.send(answer);
                }
                Ok(Event::RemoteConfig { config }) => self.datasrc_config_handler(&config),
                Ok(Event::Shutdown) => {
                    info!("shutdown requested");
                    break;
                }
                Err(_) => {
                    error!("event channel closed unexpectedly; shutting down");
                    break;
                }
            }
        }
        self.shutdown();
    }

    /// Stop the builder thread and drop all state.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.builder_thread.take() {
            self.builder.push_command(Command::Shutdown);
            if handle.join().is_err() {
                error!("segment builder thread panicked");
            }
        }
        let leftover = self.builder.commands_pending();
        if leftover != 0 {
            error!("builder command queue not drained at shutdown ({leftover} commands left)");
        }
        info!("memory manager is exiting");
    }

    fn cmd_to_builder(&mut self, command: Command) {
        debug!("command to builder: {command:?}");
        self.builder.push_command(command);
    }

    fn current_generation(&self) -> Option<GenerationId> {
        self.datasrc_info.as_ref().map(DataSrcInfo::generation)
    }

    /// The data_sources configuration changed: build the next generation,
    /// retire the previous one, and start validating the new segments.
    pub fn datasrc_config_handler(&mut self, config: &Value) {
        if let Err(e) = self.clients_mgr.reconfigure(config) {
            error!("data_sources reconfiguration failed: {e}");
            return;
        }
        let Some(generation) = self.clients_mgr.generation() else {
            return;
        };
        let Some(params) = &self.config else {
            error!("data_sources configured before the manager itself");
            return;
        };
        let fresh = DataSrcInfo::new(
            generation,
            self.clients_mgr.cached_segments(),
            &params.mapped_file_dir,
        );
        info!(
            "data source generation {generation} with {} mapped segments",
            fresh.segment_count()
        );
        if let Some(old) = self.datasrc_info.replace(fresh) {
            let old_generation = old.generation();
            self.old_datasrc_info.insert(old_generation, old);
            self.cmd_to_builder(Command::Cancel {
                generation: old_generation,
            });
        }
        self.init_segments();
    }

    /// Project the known readers onto every new segment and kick off the
    /// validation pass: one command per segment goes to the builder, the
    /// second validate and the initial load wait in the pending queue.
    fn init_segments(&mut self) {
        let readers: Vec<ReaderId> = self.readers.readers().cloned().collect();
        let Some(dsi) = &mut self.datasrc_info else {
            return;
        };
        let mut commands = Vec::new();
        for segment in dsi.segments_mut() {
            for reader in &readers {
                segment.add_reader(reader.clone());
            }
            let (first, second) = segment.start_validate();
            segment.add_event(SegmentEvent::Validate { target: second });
            segment.add_event(SegmentEvent::Load { origin: None });
            commands.push(Command::Validate {
                key: segment.key().clone(),
                target: first,
            });
        }
        if dsi.segment_count() > 0 {
            for reader in readers {
                dsi.note_reader(reader);
            }
        }
        for command in commands {
            self.cmd_to_builder(command);
        }
    }

    /// Drain and handle everything the builder has reported.
    pub fn notify_from_builder(&mut self) {
        for notification in self.builder.take_notifications() {
            match notification {
                Notification::ValidateCompleted { key, succeeded } => {
                    self.step_completed(key, succeeded, true)
                }
                Notification::LoadCompleted { key, succeeded } => {
                    self.step_completed(key, succeeded, false)
                }
                Notification::CancelCompleted { generation } => self.cancel_completed(generation),
            }
        }
    }

    /// A validate/load/copy step finished. Either the segment has more
    /// builder work to dispatch, or it has quiesced and the readers still on
    /// an old version are told to switch.
    fn step_completed(&mut self, key: SegmentKey, succeeded: bool, validated: bool) {
        if self.current_generation() != Some(key.generation) {
            debug!("dropping completion for superseded segment {key}");
            return;
        }
        let Some(dsi) = &mut self.datasrc_info else {
            return;
        };
        let Some(segment) = dsi.segment_mut(key.class, &key.name) else {
            debug!("completion for unknown segment {key}");
            return;
        };
        let command = if validated {
            segment.complete_validate(succeeded)
        } else {
            segment.complete_update(succeeded)
        };
        let params = segment.get_reset_param(ResetKind::ReadOnly);
        let pending: Vec<ReaderId> = segment.old_readers().iter().cloned().collect();

        if let Some(command) = command {
            self.cmd_to_builder(command);
            return;
        }
        let inuse_only = validated && succeeded;
        for reader in pending {
            self.send_segment_info_update(&reader, &key, params.clone(), inuse_only);
        }
    }

    /// The builder acknowledged cancellation of a retired generation. If no
    /// reader references it any more it is reclaimed on the spot; otherwise
    /// every holder is asked to release its segments.
    fn cancel_completed(&mut self, generation: GenerationId) {
        let Some(dsi) = self.old_datasrc_info.get_mut(&generation) else {
            debug!("cancel-completed for unknown generation {generation}");
            return;
        };
        dsi.mark_cancel_completed();
        if dsi.all_readers().is_empty() {
            self.old_datasrc_info.remove(&generation);
            info!("reclaimed data source generation {generation}");
            return;
        }
        let holders: Vec<ReaderId> = dsi.all_readers().iter().cloned().collect();
        for reader in holders {
            let msg = create_command(RELEASE_SEGMENTS, json!({ "generation-id": generation }));
            if let Err(e) = self.bus.send(SEGMENT_READER_GROUP, &reader, msg) {
                error!("failed to send release_segments to {reader}: {e}");
            }
        }
    }

    /// `zone_updated` notification: same work as `loadzone`, but silent on
    /// rejection and gated on the current generation.
    pub fn zone_update_notification(&mut self, event: &str, params: &Value) {
        if event != "zone_updated" {
            return;
        }
        let request: ZoneRequest = match serde_json::from_value(params.clone()) {
            Ok(request) => request,
            Err(e) => {
                debug!("dropping malformed zone_updated: {e}");
                return;
            }
        };
        let Some(generation) = request.generation_id else {
            debug!("dropping zone_updated without generation-id");
            return;
        };
        if self.current_generation() != Some(generation) {
            debug!("dropping zone_updated for generation {generation}");
            return;
        }
        if let Err(e) = self.request_zone_load(&request) {
            debug!("dropping zone_updated: {e}");
        }
    }

    /// Dispatcher for the module command surface.
    pub fn mod_command_handler(&mut self, name: &str, params: &Value) -> Option<Value> {
        match name {
            "loadzone" => Some(self.loadzone(params)),
            "segment_info_update_ack" => {
                self.segment_info_update_ack(params);
                None
            }
            "release_segments_ack" => {
                self.release_segments_ack(params);
                None
            }
            _ => {
                error!("unknown module command '{name}'");
                Some(create_answer(1, Some(&format!("unknown command: {name}"))))
            }
        }
    }

    /// `loadzone` operator command. Unlike `zone_updated` it does not check
    /// the generation: the operator addresses whatever is current.
    fn loadzone(&mut self, params: &Value) -> Value {
        let request: ZoneRequest = match serde_json::from_value(params.clone()) {
            Ok(request) => request,
            Err(e) => return create_answer(1, Some(&format!("malformed loadzone arguments: {e}"))),
        };
        match self.request_zone_load(&request) {
            Ok(()) => create_answer(0, None),
            Err(e) => {
                error!("loadzone rejected: {e}");
                create_answer(1, Some(&e.to_string()))
            }
        }
    }

    /// Shared tail of `loadzone` and `zone_updated`: validate the addressing
    /// arguments, queue a load on the segment and dispatch it if idle.
    fn request_zone_load(&mut self, request: &ZoneRequest) -> Result<(), ZoneLoadError> {
        let Some(dsi) = &mut self.datasrc_info else {
            return Err(ZoneLoadError::NoDataSources);
        };
        let class_str = request
            .class
            .as_deref()
            .ok_or(ZoneLoadError::MissingArg("class"))?;
        let class: RrClass = class_str
            .parse()
            .map_err(|_| ZoneLoadError::BadClass(class_str.to_string()))?;
        let datasource = request
            .datasource
            .as_deref()
            .ok_or(ZoneLoadError::MissingArg("datasource"))?;
        let origin_str = request
            .origin
            .as_deref()
            .ok_or(ZoneLoadError::MissingArg("origin"))?;
        let origin = Name::try_from(origin_str)
            .map_err(|e| ZoneLoadError::BadOrigin(origin_str.to_string(), e))?;

        let command = {
            let Some(segment) = dsi.segment_mut(class, datasource) else {
                return Err(ZoneLoadError::UnknownDataSource(
                    class,
                    datasource.to_string(),
                ));
            };
            segment.add_event(SegmentEvent::Load {
                origin: Some(origin),
            });
            segment.start_update()
        };
        if let Some(command) = command {
            self.cmd_to_builder(command);
        }
        Ok(())
    }

    /// A reader acknowledged one `segment_info_update`. Anything that does
    /// not line up with current state is a stale race and is dropped.
    fn segment_info_update_ack(&mut self, params: &Value) {
        let ack: SegmentInfoUpdateAck = match serde_json::from_value(params.clone()) {
            Ok(ack) => ack,
            Err(e) => {
                debug!("dropping malformed segment_info_update_ack: {e}");
                return;
            }
        };
        if self.current_generation() != Some(ack.generation_id) {
            debug!(
                "dropping segment_info_update_ack for generation {}",
                ack.generation_id
            );
            return;
        }
        let Some(dsi) = &mut self.datasrc_info else {
            return;
        };
        let Some(segment) = dsi.segment_mut(ack.class, &ack.name) else {
            debug!(
                "dropping segment_info_update_ack for unknown segment {}/{}",
                ack.class, ack.name
            );
            return;
        };
        let key = SegmentKey {
            generation: ack.generation_id,
            class: ack.class,
            name: ack.name.clone(),
        };
        let command = match self.readers.ack_update(&ack.reader, &key) {
            AckOutcome::Unknown => {
                debug!("dropping untracked segment_info_update_ack from {}", ack.reader);
                None
            }
            AckOutcome::Outstanding(_) => None,
            AckOutcome::Synchronized => segment.sync_reader(&ack.reader),
        };
        if let Some(command) = command {
            self.cmd_to_builder(command);
        }
    }

    /// A reader acknowledged `release_segments` for a retired generation.
    fn release_segments_ack(&mut self, params: &Value) {
        let ack: ReleaseSegmentsAck = match serde_json::from_value(params.clone()) {
            Ok(ack) => ack,
            Err(e) => {
                debug!("dropping malformed release_segments_ack: {e}");
                return;
            }
        };
        let Some(dsi) = self.old_datasrc_info.get_mut(&ack.generation_id) else {
            debug!(
                "dropping release_segments_ack for unknown generation {}",
                ack.generation_id
            );
            return;
        };
        dsi.cancel(&ack.reader);
        if dsi.all_readers().is_empty() && dsi.cancel_completed() {
            self.old_datasrc_info.remove(&ack.generation_id);
            info!("reclaimed data source generation {}", ack.generation_id);
        }
    }

    /// Bus membership traffic. Only subscribe/unsubscribe of the
    /// SegmentReader group matter.
    pub fn reader_notification(&mut self, event: &str, params: &Value) {
        if event != "subscribed" && event != "unsubscribed" {
            return;
        }
        let Ok(member) = serde_json::from_value::<MemberEvent>(params.clone()) else {
            return;
        };
        if member.group.as_deref() != Some(SEGMENT_READER_GROUP) {
            return;
        }
        let Some(client) = member.client else {
            return;
        };
        if event == "subscribed" {
            self.reader_subscribed(client);
        } else {
            self.reader_unsubscribed(&client);
        }
    }

    fn reader_subscribed(&mut self, reader: ReaderId) {
        if !self.readers.register(&reader) {
            debug!("duplicate subscription from {reader}");
            return;
        }
        info!("segment reader {reader} subscribed");
        let Some(dsi) = &mut self.datasrc_info else {
            return;
        };
        let mut updates = Vec::new();
        for segment in dsi.segments_mut() {
            segment.add_reader(reader.clone());
            if segment.loaded() {
                updates.push((
                    segment.key().clone(),
                    segment.get_reset_param(ResetKind::ReadOnly),
                ));
            }
        }
        if dsi.segment_count() > 0 {
            dsi.note_reader(reader.clone());
        }
        for (key, params) in updates {
            self.send_segment_info_update(&reader, &key, params, false);
        }
    }

    fn reader_unsubscribed(&mut self, reader: &ReaderId) {
        if !self.readers.deregister(reader) {
            debug!("unsubscription from unknown reader {reader}");
            return;
        }
        info!("segment reader {reader} unsubscribed");
        let mut commands = Vec::new();
        if let Some(dsi) = &mut self.datasrc_info {
            commands = dsi.remove_reader(reader);
        }
        for command in commands {
            self.cmd_to_builder(command);
        }
        // retired generations this reader was holding up
        self.old_datasrc_info.retain(|generation, dsi| {
            dsi.cancel(reader);
            let done = dsi.all_readers().is_empty() && dsi.cancel_completed();
            if done {
                info!("reclaimed data source generation {generation}");
            }
            !done
        });
    }

    fn send_segment_info_update(
        &mut self,
        reader: &ReaderId,
        key: &SegmentKey,
        segment_params: Value,
        inuse_only: bool,
    ) {
        let mut payload = json!({
            "data-source-class": key.class,
            "data-source-name": key.name,
            "segment-params": segment_params,
            "reader": reader,
            "generation-id": key.generation,
        });
        if inuse_only {
            payload["inuse-only"] = json!(true);
        }
        let msg = create_command(SEGMENT_INFO_UPDATE, payload);
        match self.bus.send(SEGMENT_READER_GROUP, reader, msg) {
            Ok(()) => self.readers.note_update_sent(reader, key),
            Err(e) => error!("failed to send segment_info_update to {reader}: {e}"),
        }
    }
}
