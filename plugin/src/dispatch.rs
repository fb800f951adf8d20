// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Dispatch of plugin commands to the dataplanes and the store.

use crate::engine::{EngineError, InterfaceRequest, Provisioners};
use crate::ipam::{Ipam, IpamError};
use crate::result::CniResult;
use args::Attachment;
use netconf::{Engine, Location, NetConf, NetConfError, RequiredField, UserSpaceConf};
use store::{
    AuxiliaryData, ContainerId, InterfaceName, InterfaceRecord, InvalidName, Store, StoreError,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DispatchError {
    #[error(transparent)]
    NetConf(#[from] NetConfError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ipam(#[from] IpamError),
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
}

/// An interface provisioned from a claimed configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub container_id: ContainerId,
    pub ifname: InterfaceName,
    pub record: InterfaceRecord,
}

fn engine_of(conf: &UserSpaceConf) -> Result<Engine, NetConfError> {
    conf.engine
        .ok_or(NetConfError::Missing(RequiredField::Engine))
}

/// Runs the plugin commands.
///
/// The host side of an interface is always provisioned by the invocation handling the add. When
/// the host side is [remote](Location::Remote), the container side is not provisioned: its
/// configuration is staged in the store, for an invocation running for the container to
/// [apply](Dispatcher::apply_pending).
pub struct Dispatcher {
    store: Store,
    provisioners: Provisioners,
}

impl Dispatcher {
    #[must_use]
    pub fn new(store: Store, provisioners: Provisioners) -> Self {
        Self {
            store,
            provisioners,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create the interface described by `request` and save its state. If the state can't be
    /// saved, the interface is deleted again: nothing would be able to delete it later.
    fn provision(
        &self,
        engine: Engine,
        request: &InterfaceRequest,
    ) -> Result<InterfaceRecord, DispatchError> {
        let provisioner = self.provisioners.get(engine)?;
        let record = provisioner.add_interface(request)?;
        if let Err(e) =
            self.store
                .save_interface_state(&request.container_id, &request.ifname, &record)
        {
            warn!(
                "failed to save state of interface {}, deleting it: {e}",
                request.ifname
            );
            if let Err(e) = provisioner.del_interface(request, &record) {
                error!("failed to delete interface {}: {e}", request.ifname);
            }
            return Err(e.into());
        }
        Ok(record)
    }

    /// Handle an add.
    ///
    /// A vhost-user interface configured without a socket file gets the default one of the
    /// store, and a random MAC address if it has none.
    ///
    /// # Errors
    ///
    /// If the configuration is unusable, or if address management, the dataplane or the store
    /// fail.
    #[tracing::instrument(level = "debug", skip(self, stdin, ipam), fields(container = %attachment.container_id))]
    pub fn cmd_add(
        &self,
        attachment: &Attachment,
        stdin: &[u8],
        ipam: &dyn Ipam,
    ) -> Result<CniResult, DispatchError> {
        let conf = NetConf::from_slice(stdin)?;
        let ifname = InterfaceName::new(conf.ifname(attachment.ifname.as_str()))?;
        let engine = engine_of(&conf.host)?;

        let ip = match &conf.ipam.plugin {
            Some(plugin) => Some(ipam.add(plugin, stdin)?),
            None => None,
        };

        let mut request = InterfaceRequest::new(
            attachment.container_id.clone(),
            ifname.clone(),
            &conf.host,
            ip,
        )?;
        if request.uses_default_socket() {
            let socket = self
                .store
                .prepare_vhost_socket(&attachment.container_id, &ifname)?;
            request = request.with_default_socket(&socket);
        }
        let request = request.with_default_mac();
        self.provision(engine, &request)?;

        match conf.host.location() {
            Location::Local => {}
            Location::Remote => {
                let view = conf.container_view();
                view.validate()?;
                let aux = AuxiliaryData::new(attachment.container_id.clone(), ip);
                self.store.stage_remote_config(&ifname, &view, &aux)?;
            }
        }
        info!(
            "added interface {ifname} on {engine} ({})",
            conf.host.location()
        );
        Ok(CniResult::new(
            &conf.cni_version,
            &ifname,
            request.mac.clone(),
            attachment.netns.as_ref().map(|ns| ns.display().to_string()),
            ip.as_ref(),
        ))
    }

    /// Handle a delete.
    ///
    /// Deleting an interface which does not exist (anymore) succeeds: the runtime may repeat a
    /// delete, or issue one after a failed add. The default socket of a vhost-user interface is
    /// removed in either case.
    ///
    /// # Errors
    ///
    /// If the configuration is unusable, or if address management, the dataplane or the store
    /// fail. The saved state of the interface is consumed before the dataplane is asked to
    /// delete it, so a failure of the latter is not retried by a later delete.
    #[tracing::instrument(level = "debug", skip(self, stdin, ipam), fields(container = %attachment.container_id))]
    pub fn cmd_del(
        &self,
        attachment: &Attachment,
        stdin: &[u8],
        ipam: &dyn Ipam,
    ) -> Result<(), DispatchError> {
        let conf = NetConf::from_slice(stdin)?;
        let ifname = InterfaceName::new(conf.ifname(attachment.ifname.as_str()))?;
        let engine = engine_of(&conf.host)?;

        let request = InterfaceRequest::new(
            attachment.container_id.clone(),
            ifname.clone(),
            &conf.host,
            None,
        );
        let default_socket = matches!(&request, Ok(request) if request.uses_default_socket());
        match self
            .store
            .take_interface_state(&attachment.container_id, &ifname)?
        {
            Some(record) => {
                let mut request = request?;
                if default_socket {
                    let socket = self
                        .store
                        .vhost_socket_path(&attachment.container_id, &ifname)?;
                    request = request.with_default_socket(&socket);
                }
                self.provisioners
                    .get(engine)?
                    .del_interface(&request, &record)?;
            }
            None => debug!("no state for interface {ifname}, nothing to delete"),
        }
        if default_socket {
            self.store
                .release_vhost_socket(&attachment.container_id, &ifname)?;
        }

        match conf.host.location() {
            Location::Local => {}
            Location::Remote => self
                .store
                .discard_container_state(&attachment.container_id)?,
        }

        if let Some(plugin) = &conf.ipam.plugin {
            ipam.del(plugin, stdin)?;
        }
        info!("deleted interface {ifname}");
        Ok(())
    }

    /// Handle a check: the configuration must be usable by this plugin.
    ///
    /// # Errors
    ///
    /// If the configuration is unusable.
    #[tracing::instrument(level = "debug", skip(self, stdin))]
    pub fn cmd_check(&self, attachment: &Attachment, stdin: &[u8]) -> Result<(), DispatchError> {
        let conf = NetConf::from_slice(stdin)?;
        let ifname = InterfaceName::new(conf.ifname(attachment.ifname.as_str()))?;
        self.provisioners.get(engine_of(&conf.host)?)?;
        InterfaceRequest::new(attachment.container_id.clone(), ifname.clone(), &conf.host, None)?;
        debug!("configuration of interface {ifname} is usable");
        Ok(())
    }

    /// Claim one staged configuration, and provision the interface it describes.
    ///
    /// The state of the interface is saved under the container id found in the claimed
    /// configuration. Returns `Ok(None)` if no configuration is pending.
    ///
    /// # Errors
    ///
    /// If claiming fails, if the claimed configuration is unusable, or if the dataplane or the
    /// store fail. A claimed configuration is consumed even if it could not be applied.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn apply_pending(&self) -> Result<Option<Applied>, DispatchError> {
        let Some(pending) = self.store.claim_pending_remote_config::<NetConf>()? else {
            return Ok(None);
        };
        let conf = &pending.config;
        conf.validate()?;
        if conf.host.location() == Location::Remote {
            warn!(
                "claimed configuration of interface {} is remote, provisioning it here anyway",
                pending.ifname
            );
        }
        let engine = engine_of(&conf.host)?;
        let mut request = InterfaceRequest::new(
            pending.container_id().clone(),
            pending.ifname.clone(),
            &conf.host,
            pending.aux.ip().copied(),
        )?;
        if request.uses_default_socket() {
            let socket = self
                .store
                .shared_vhost_socket_path(pending.container_id(), &pending.ifname);
            request = request.with_default_socket(&socket);
        }
        let request = request.with_default_mac();
        let record = self.provision(engine, &request)?;
        info!(
            "applied staged configuration of interface {} of container {}",
            pending.ifname,
            pending.container_id()
        );
        Ok(Some(Applied {
            container_id: pending.container_id().clone(),
            ifname: pending.ifname.clone(),
            record,
        }))
    }

    /// Apply every staged configuration, until none is left.
    ///
    /// # Errors
    ///
    /// Stops at the first configuration that can't be applied.
    pub fn apply_all_pending(&self) -> Result<Vec<Applied>, DispatchError> {
        let mut applied = vec![];
        while let Some(one) = self.apply_pending()? {
            applied.push(one);
        }
        Ok(applied)
    }
}
