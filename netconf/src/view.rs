// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The container's view of a network configuration

use crate::conf::{InterfaceType, Location, MemifRole, NetConf, NetType, UserSpaceConf, VhostMode};

impl NetConf {
    /// The configuration as the container side has to see it.
    ///
    /// The container section becomes the host section of the result, and the container section
    /// of the result is empty. Fields left unset on the container side are derived from the host
    /// side:
    ///
    /// * the engine and interface type are inherited;
    /// * the network type defaults to [`NetType::Interface`];
    /// * a memif role is the peer of the host's role (a master host gets a slave), and the memif
    ///   mode is inherited;
    /// * a vhost-user mode is the peer of the host's mode (a client host gets a server).
    ///
    /// The result is always [`Location::Local`], and carries no address management plugin: the
    /// address has already been assigned on the host side.
    #[must_use]
    pub fn container_view(&self) -> NetConf {
        let host = &self.host;
        let mut view = self.container.clone();

        view.engine = view.engine.or(host.engine);
        view.iftype = view.iftype.or(host.iftype);
        view.net_type = view.net_type.or(Some(NetType::Interface));
        match view.iftype {
            Some(InterfaceType::Memif) => {
                if view.memif.role.is_none() {
                    view.memif.role =
                        Some(host.memif.role.map_or(MemifRole::Master, MemifRole::peer));
                }
                view.memif.mode = view.memif.mode.or(host.memif.mode);
            }
            Some(InterfaceType::Vhostuser) => {
                if view.vhost.mode.is_none() {
                    view.vhost.mode =
                        Some(host.vhost.mode.map_or(VhostMode::Client, VhostMode::peer));
                }
            }
            None => {}
        }
        view.location = Some(Location::Local);

        let mut copy = self.clone();
        copy.host = view;
        copy.container = UserSpaceConf::default();
        copy.ipam.plugin = None;
        copy
    }
}

#[cfg(test)]
mod test {
    use crate::conf::*;
    use pretty_assertions::assert_eq;

    fn memif_host(role: Option<MemifRole>) -> NetConf {
        NetConf {
            cni_version: "0.3.1".to_string(),
            name: "userspace-net".to_string(),
            plugin: "userspace".to_string(),
            ipam: Ipam {
                plugin: Some("host-local".to_string()),
                ..Default::default()
            },
            host: UserSpaceConf {
                engine: Some(Engine::Vpp),
                iftype: Some(InterfaceType::Memif),
                net_type: Some(NetType::Bridge),
                location: Some(Location::Remote),
                memif: MemifConf {
                    role,
                    mode: Some(MemifMode::Ip),
                    ..Default::default()
                },
                bridge: BridgeConf {
                    bridge_id: 4,
                    vlan_id: 0,
                },
                ..Default::default()
            },
            if0name: Some("net0".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_memif_master_becomes_slave() {
        let view = memif_host(Some(MemifRole::Master)).container_view();
        assert_eq!(
            view.host,
            UserSpaceConf {
                engine: Some(Engine::Vpp),
                iftype: Some(InterfaceType::Memif),
                net_type: Some(NetType::Interface),
                location: Some(Location::Local),
                memif: MemifConf {
                    role: Some(MemifRole::Slave),
                    mode: Some(MemifMode::Ip),
                    ..Default::default()
                },
                ..Default::default()
            }
        );
        assert!(view.container.is_empty());
        assert_eq!(view.ipam.plugin, None);
        assert_eq!(view.if0name.as_deref(), Some("net0"));
    }

    #[test]
    fn test_memif_slave_or_unset_becomes_master() {
        for role in [Some(MemifRole::Slave), None] {
            let view = memif_host(role).container_view();
            assert_eq!(view.host.memif.role, Some(MemifRole::Master));
        }
    }

    #[test]
    fn test_explicit_container_settings_win() {
        let mut conf = memif_host(Some(MemifRole::Master));
        conf.container = UserSpaceConf {
            engine: Some(Engine::OvsDpdk),
            net_type: Some(NetType::Bridge),
            memif: MemifConf {
                role: Some(MemifRole::Master),
                mode: Some(MemifMode::Ethernet),
                socket_id: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let view = conf.container_view();
        assert_eq!(view.host.engine, Some(Engine::OvsDpdk));
        assert_eq!(view.host.iftype, Some(InterfaceType::Memif));
        assert_eq!(view.host.net_type, Some(NetType::Bridge));
        assert_eq!(view.host.memif.role, Some(MemifRole::Master));
        assert_eq!(view.host.memif.mode, Some(MemifMode::Ethernet));
        assert_eq!(view.host.memif.socket_id, 3);
    }

    #[test]
    fn test_vhost_mode_is_flipped() {
        let mut conf = NetConf {
            host: UserSpaceConf {
                engine: Some(Engine::OvsDpdk),
                iftype: Some(InterfaceType::Vhostuser),
                vhost: VhostConf {
                    mode: Some(VhostMode::Client),
                    socket_file: None,
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            conf.container_view().host.vhost.mode,
            Some(VhostMode::Server)
        );
        conf.host.vhost.mode = Some(VhostMode::Server);
        assert_eq!(
            conf.container_view().host.vhost.mode,
            Some(VhostMode::Client)
        );
        conf.host.vhost.mode = None;
        assert_eq!(
            conf.container_view().host.vhost.mode,
            Some(VhostMode::Client)
        );
    }

    #[test]
    fn test_view_of_view_flips_again() {
        let view = memif_host(Some(MemifRole::Master)).container_view();
        let again = view.container_view();
        // an empty container side inherits from the host side, so the roles flip once more
        assert_eq!(again.host.memif.role, Some(MemifRole::Master));
        assert_eq!(again.host.location, Some(Location::Local));
    }
}
