//! Interface inventory dump.

use std::collections::HashMap;

use vswitch_dpapi::api::interface::{InterfaceDetails, InterfaceType, LinkDetails};
use vswitch_dpapi::{drain_dump, ApiResult, DataplaneApi, Detail, DumpRequest};
use vswitch_orch_common::InventoryItem;

use super::types::{
    AfPacketLink, InterfaceConfig, InterfaceKind, InterfaceLink, MemifLink, TapLink, VxlanLink,
};

/// Memif socket filenames registered in the dataplane, by filename.
pub fn dump_memif_sockets(api: &dyn DataplaneApi) -> ApiResult<HashMap<String, u32>> {
    let details = drain_dump(api, DumpRequest::MemifSockets)?;
    Ok(details
        .into_iter()
        .filter_map(|detail| match detail {
            Detail::MemifSocket(socket) => Some((socket.filename, socket.socket_id)),
            _ => None,
        })
        .collect())
}

/// Dumps every interface as an inventory item.
///
/// `sockets` maps memif socket filenames to ids and is used to report the
/// filename of dumped memifs.
pub fn dump_interfaces(
    api: &dyn DataplaneApi,
    sockets: &HashMap<String, u32>,
) -> ApiResult<Vec<InventoryItem<InterfaceConfig>>> {
    let by_id: HashMap<u32, &str> = sockets
        .iter()
        .map(|(filename, id)| (*id, filename.as_str()))
        .collect();
    let details = drain_dump(api, DumpRequest::Interfaces)?;
    Ok(details
        .into_iter()
        .filter_map(|detail| match detail {
            Detail::Interface(details) => Some(inventory_item(details, &by_id)),
            _ => None,
        })
        .collect())
}

fn inventory_item(details: InterfaceDetails, sockets: &HashMap<u32, &str>) -> InventoryItem<InterfaceConfig> {
    let configurable = details.index != 0 && details.if_type.is_creatable();
    let observed = observed_config(&details, sockets);
    InventoryItem {
        index: details.index,
        internal_name: details.internal_name,
        observed,
        configurable,
    }
}

/// Reconstructs an interface config from its dump entry.
pub fn observed_config(details: &InterfaceDetails, sockets: &HashMap<u32, &str>) -> InterfaceConfig {
    let kind = match details.if_type {
        InterfaceType::Local => InterfaceKind::Local,
        InterfaceType::Ethernet => InterfaceKind::Ethernet,
        InterfaceType::Loopback => InterfaceKind::Loopback,
        InterfaceType::Memif => InterfaceKind::Memif,
        InterfaceType::Tap => InterfaceKind::Tap,
        InterfaceType::Vxlan => InterfaceKind::Vxlan,
        InterfaceType::AfPacket => InterfaceKind::AfPacket,
    };
    let mut vrf = details.vrf_id;
    let link = match &details.link {
        LinkDetails::None => InterfaceLink::None,
        LinkDetails::Memif(memif) => InterfaceLink::Memif(MemifLink {
            id: memif.id,
            socket_filename: sockets
                .get(&memif.socket_id)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            master: memif.master,
            mode: memif.mode,
            ring_size: memif.ring_size,
            buffer_size: memif.buffer_size,
            rx_queues: memif.rx_queues,
            tx_queues: memif.tx_queues,
            secret: memif.secret.clone(),
        }),
        LinkDetails::Tap(tap) => InterfaceLink::Tap(TapLink {
            host_if_name: tap.host_if_name.clone(),
            rx_ring_size: tap.rx_ring_size,
            tx_ring_size: tap.tx_ring_size,
        }),
        LinkDetails::Vxlan(tunnel) => {
            vrf = tunnel.encap_vrf_id;
            InterfaceLink::Vxlan(VxlanLink {
                src_address: tunnel.src_address,
                dst_address: tunnel.dst_address,
                vni: tunnel.vni,
            })
        }
        LinkDetails::AfPacket(af) => InterfaceLink::AfPacket(AfPacketLink {
            host_if_name: af.host_if_name.clone(),
        }),
    };

    InterfaceConfig {
        name: details.reported_name().to_string(),
        kind,
        enabled: details.admin_up,
        mac: details.mac,
        mtu: details.mtu,
        vrf,
        ip_addresses: details.addresses.clone(),
        link,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vswitch_dpapi::api::interface::MemifCreate;
    use vswitch_dpapi::{Request, SimDataplane};

    #[test]
    fn test_dump_classifies_items() {
        let sim = SimDataplane::with_physical(["GigabitEthernet0/8/0"]);
        let index = sim
            .request_index(Request::CreateLoopback { mac: None })
            .unwrap();
        sim.request(Request::SetInterfaceTag {
            index,
            tag: "loop-a".to_string(),
        })
        .unwrap();

        let sockets = dump_memif_sockets(&sim).unwrap();
        let items = dump_interfaces(&sim, &sockets).unwrap();
        assert_eq!(items.len(), 3);

        let local = &items[0];
        assert!(!local.configurable);
        assert_eq!(local.observed.kind, InterfaceKind::Local);

        let physical = &items[1];
        assert!(!physical.configurable);
        assert_eq!(physical.observed.name, "GigabitEthernet0/8/0");

        let loopback = &items[2];
        assert!(loopback.configurable);
        assert_eq!(loopback.internal_name, "loop0");
        assert_eq!(loopback.observed.name, "loop-a");
    }

    #[test]
    fn test_memif_socket_filename_resolved() {
        let sim = SimDataplane::new();
        sim.request(Request::MemifSocketFilenameAdd {
            socket_id: 4,
            filename: "/run/app.sock".to_string(),
        })
        .unwrap();
        sim.request_index(Request::CreateMemif(MemifCreate {
            id: 2,
            socket_id: 4,
            master: false,
            mode: Default::default(),
            ring_size: 512,
            buffer_size: 2048,
            rx_queues: 1,
            tx_queues: 1,
            secret: String::new(),
        }))
        .unwrap();

        let sockets = dump_memif_sockets(&sim).unwrap();
        assert_eq!(sockets.get("/run/app.sock"), Some(&4));
        let items = dump_interfaces(&sim, &sockets).unwrap();
        match &items[1].observed.link {
            InterfaceLink::Memif(memif) => {
                assert_eq!(memif.socket_filename, "/run/app.sock");
                assert_eq!(memif.ring_size, 512);
            }
            other => panic!("unexpected link {:?}", other),
        }
    }
}
