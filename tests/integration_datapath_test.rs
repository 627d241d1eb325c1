// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! Integration tests for the data path: loopback delivery, resequencing,
//! transit forwarding, PDUFT retargeting and management PDUs.

use nori::buffer::Buffer;
use nori::config::{DtcpConfig, FcConfig, FlowConfig};
use nori::error::SduWriteError;
use nori::flow::{Flow, Upper};
use nori::ipcp::{IpcpOps, MgmtHdr, NormalIpcp};
use nori::pci::{ConnId, PDU_FLAG_DRF, PDU_T_ACK_BIT, PDU_T_DT, PDU_T_MGMT, Pci, PciCtrl};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Lower IPCP standing in for a shim DIF: records every PDU written
/// through it.
#[derive(Default)]
struct CapturingShim {
    written: Mutex<Vec<Buffer>>,
}

impl CapturingShim {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn take_written(&self) -> Vec<Buffer> {
        std::mem::take(&mut self.written.lock().unwrap())
    }
}

impl IpcpOps for CapturingShim {
    fn sdu_write(
        &self,
        _flow: &Arc<Flow>,
        buf: Buffer,
        _maysleep: bool,
    ) -> Result<(), SduWriteError> {
        self.written.lock().unwrap().push(buf);
        Ok(())
    }

    fn sdu_rx(&self, _buf: Buffer) -> Result<(), SduWriteError> {
        Ok(())
    }
}

fn ipcp_with_addr(addr: u64) -> Arc<NormalIpcp> {
    let ipcp = NormalIpcp::new();
    ipcp.config("address", &addr.to_string()).unwrap();
    ipcp
}

fn user_flow(
    ipcp: &Arc<NormalIpcp>,
    local_port: u32,
    remote_port: u32,
    remote_addr: u64,
    cfg: FlowConfig,
) -> Arc<Flow> {
    let provider = Arc::downgrade(ipcp) as Weak<dyn IpcpOps>;
    let flow = Flow::new(local_port, remote_port, remote_addr, cfg, provider, Upper::User);
    ipcp.flow_init(&flow);
    flow
}

fn lower_flow(ipcp: &Arc<NormalIpcp>, shim: &Arc<CapturingShim>, local_port: u32) -> Arc<Flow> {
    let provider = Arc::downgrade(shim) as Weak<dyn IpcpOps>;
    let flow = Flow::new(
        local_port,
        local_port,
        0,
        FlowConfig::default(),
        provider,
        Upper::Ipcp(Arc::downgrade(ipcp) as Weak<dyn IpcpOps>),
    );
    ipcp.lower_flow_bind(&flow);
    flow
}

/// A data PDU as it would arrive from the wire.
fn dt_pdu(dst_addr: u64, dst_cep: u32, seqnum: u64, drf: bool, payload: &[u8]) -> Buffer {
    let mut buf = Buffer::from_slice(payload);
    buf.push_pci();
    Pci {
        dst_addr,
        src_addr: 1000,
        conn_id: ConnId {
            qos_id: 0,
            dst_cep,
            src_cep: 99,
        },
        pdu_type: PDU_T_DT,
        pdu_flags: if drf { PDU_FLAG_DRF } else { 0 },
        seqnum,
    }
    .write(buf.data_mut());
    buf
}

fn rtx_cfg() -> FlowConfig {
    FlowConfig {
        max_sdu_gap: 10,
        dtcp: Some(DtcpConfig {
            flow_control: false,
            rtx_control: true,
            fc: FcConfig::None,
        }),
        ..FlowConfig::default()
    }
}

#[test]
fn test_loopback_data_transfer() {
    // A self flow: remote address equals the IPCP address and no route is
    // installed, so the router loops PDUs straight back into sdu_rx.
    let ipcp = ipcp_with_addr(42);
    let flow = user_flow(&ipcp, 7, 7, 42, FlowConfig::default());

    ipcp.sdu_write(&flow, Buffer::from_slice(b"hello"), false)
        .unwrap();
    ipcp.sdu_write(&flow, Buffer::from_slice(b"hello"), false)
        .unwrap();

    for _ in 0..2 {
        let sdu = flow.recv(Duration::from_secs(1)).expect("missing delivery");
        assert_eq!(sdu.data(), b"hello");
    }
    let snap = flow.dtp_snapshot();
    assert_eq!(snap.rcv_lwe, 2);
    assert_eq!(snap.next_seq_num_to_send, 2);
}

#[test]
fn test_dt_stamping_on_the_wire() {
    // Route the flow's destination through a capturing shim and inspect
    // the stamped headers: seqnums count up and only the first PDU
    // carries the DRF.
    let ipcp = ipcp_with_addr(5);
    let shim = CapturingShim::new();
    let lower = lower_flow(&ipcp, &shim, 33);
    ipcp.pduft_set(88, &lower);

    let flow = user_flow(&ipcp, 7, 8, 88, FlowConfig::default());
    ipcp.sdu_write(&flow, Buffer::from_slice(b"first"), false)
        .unwrap();
    ipcp.sdu_write(&flow, Buffer::from_slice(b"second"), false)
        .unwrap();

    let written = shim.take_written();
    assert_eq!(written.len(), 2);
    for (i, pdu) in written.iter().enumerate() {
        let pci = Pci::read(pdu.data()).unwrap();
        assert_eq!(pci.dst_addr, 88);
        assert_eq!(pci.src_addr, 5);
        assert_eq!(pci.conn_id.dst_cep, 8);
        assert_eq!(pci.conn_id.src_cep, 7);
        assert_eq!(pci.pdu_type, PDU_T_DT);
        assert_eq!(pci.seqnum, i as u64);
        assert_eq!(pci.has_drf(), i == 0);
    }
}

#[test]
fn test_resequencing_waits_for_gap_fill() {
    let ipcp = ipcp_with_addr(42);
    let shim = CapturingShim::new();
    let lower = lower_flow(&ipcp, &shim, 33);
    ipcp.pduft_set(1000, &lower);

    let flow = user_flow(&ipcp, 7, 9, 1000, rtx_cfg());

    ipcp.sdu_rx(dt_pdu(42, 7, 0, true, b"p0")).unwrap();
    assert_eq!(
        flow.recv(Duration::from_secs(1)).unwrap().data(),
        b"p0"
    );

    // 2 and 3 arrive before 1: they wait in the resequencing queue for
    // the retransmission to fill the gap.
    ipcp.sdu_rx(dt_pdu(42, 7, 2, false, b"p2")).unwrap();
    ipcp.sdu_rx(dt_pdu(42, 7, 3, false, b"p3")).unwrap();
    assert!(flow.try_recv().is_none());
    assert_eq!(flow.dtp_snapshot().seqq_len, 2);

    ipcp.sdu_rx(dt_pdu(42, 7, 1, false, b"p1")).unwrap();
    for expected in [b"p1", b"p2", b"p3"] {
        assert_eq!(
            flow.recv(Duration::from_secs(1)).unwrap().data(),
            expected
        );
    }

    let snap = flow.dtp_snapshot();
    assert_eq!(snap.rcv_lwe, 4);
    assert_eq!(snap.seqq_len, 0);

    // Retransmission control acknowledges every delivery; the last
    // control PDU announces the final left window edge.
    let ctrl = shim.take_written();
    assert!(!ctrl.is_empty());
    let pcic = PciCtrl::read(ctrl.last().unwrap().data()).unwrap();
    assert!(pcic.base.is_ctrl());
    assert_ne!(pcic.base.pdu_type & PDU_T_ACK_BIT, 0);
    assert_eq!(pcic.new_lwe, 4);
}

#[test]
fn test_duplicate_in_gap_dropped() {
    let ipcp = ipcp_with_addr(42);
    let flow = user_flow(&ipcp, 7, 9, 1000, rtx_cfg());

    ipcp.sdu_rx(dt_pdu(42, 7, 0, true, b"p0")).unwrap();
    flow.recv(Duration::from_secs(1)).unwrap();

    ipcp.sdu_rx(dt_pdu(42, 7, 2, false, b"p2")).unwrap();
    ipcp.sdu_rx(dt_pdu(42, 7, 2, false, b"p2-again")).unwrap();
    assert_eq!(flow.dtp_snapshot().seqq_len, 1);

    ipcp.sdu_rx(dt_pdu(42, 7, 1, false, b"p1")).unwrap();
    assert_eq!(flow.recv(Duration::from_secs(1)).unwrap().data(), b"p1");
    assert_eq!(flow.recv(Duration::from_secs(1)).unwrap().data(), b"p2");
    assert!(flow.try_recv().is_none());
}

#[test]
fn test_pduft_retarget_switches_route() {
    let ipcp = ipcp_with_addr(5);
    let shim_a = CapturingShim::new();
    let shim_b = CapturingShim::new();
    let fa = lower_flow(&ipcp, &shim_a, 31);
    let fb = lower_flow(&ipcp, &shim_b, 32);

    ipcp.pduft_set(100, &fa);
    ipcp.pduft_set(100, &fb);

    ipcp.rmt_tx(100, Buffer::from_slice(b"via-b"), false).unwrap();
    assert!(shim_a.take_written().is_empty());
    assert_eq!(shim_b.take_written().len(), 1);

    // fa's reverse index no longer owns the entry: unbinding fa must not
    // disturb the route through fb.
    ipcp.lower_flow_unbind(&fa);
    ipcp.rmt_tx(100, Buffer::from_slice(b"still-b"), false)
        .unwrap();
    assert_eq!(shim_b.take_written().len(), 1);
}

#[test]
fn test_transit_forwarding() {
    // A PDU for another address is re-routed without touching flow state.
    let ipcp = ipcp_with_addr(42);
    let shim = CapturingShim::new();
    let lower = lower_flow(&ipcp, &shim, 33);
    ipcp.pduft_set(77, &lower);

    let pdu = dt_pdu(77, 7, 0, true, b"transit");
    let original = pdu.try_clone().unwrap();
    ipcp.sdu_rx(pdu).unwrap();

    let written = shim.take_written();
    assert_eq!(written.len(), 1);
    // Forwarded verbatim, header included.
    assert_eq!(written[0].data(), original.data());
}

#[test]
fn test_no_route_drops_silently() {
    let ipcp = ipcp_with_addr(42);
    ipcp.sdu_rx(dt_pdu(77, 7, 0, true, b"lost")).unwrap();
    ipcp.rmt_tx(78, Buffer::from_slice(b"lost-too"), false)
        .unwrap();
}

#[test]
fn test_mgmt_by_destination_address() {
    let ipcp = ipcp_with_addr(5);
    let shim = CapturingShim::new();
    let lower = lower_flow(&ipcp, &shim, 33);
    ipcp.pduft_set(200, &lower);

    ipcp.mgmt_sdu_write(&MgmtHdr::OutDstAddr(200), Buffer::from_slice(b"mgmt"))
        .unwrap();

    let written = shim.take_written();
    assert_eq!(written.len(), 1);
    let pci = Pci::read(written[0].data()).unwrap();
    assert_eq!(pci.pdu_type, PDU_T_MGMT);
    assert_eq!(pci.dst_addr, 200);
    assert_eq!(pci.src_addr, 5);
    assert_eq!(pci.conn_id, ConnId::default());
    assert_eq!(pci.seqnum, 0);
}

#[test]
fn test_mgmt_by_local_port() {
    let ipcp = ipcp_with_addr(5);
    let shim = CapturingShim::new();
    let lower = lower_flow(&ipcp, &shim, 33);

    // No PDUFT entry needed when addressing the lower flow directly.
    ipcp.mgmt_sdu_write(&MgmtHdr::OutLocalPort(33), Buffer::from_slice(b"mgmt"))
        .unwrap();
    assert_eq!(shim.take_written().len(), 1);

    // Unknown port: dropped, not an error.
    ipcp.mgmt_sdu_write(&MgmtHdr::OutLocalPort(44), Buffer::from_slice(b"mgmt"))
        .unwrap();
    assert!(shim.take_written().is_empty());
    let _ = lower;
}

#[test]
fn test_recursive_delivery_to_upper_ipcp() {
    // Two stacked normal IPCPs: a PDU delivered on the lower one's flow
    // carries a whole upper-layer PDU as its payload.
    let upper_ipcp = ipcp_with_addr(9);
    let lower_ipcp = ipcp_with_addr(42);

    let app_flow = user_flow(&upper_ipcp, 4, 4, 9, FlowConfig::default());

    // The lower IPCP's flow 7 feeds the upper IPCP.
    let provider = Arc::downgrade(&lower_ipcp) as Weak<dyn IpcpOps>;
    let n1_flow = Flow::new(
        7,
        7,
        42,
        FlowConfig::default(),
        provider,
        Upper::Ipcp(Arc::downgrade(&upper_ipcp) as Weak<dyn IpcpOps>),
    );
    lower_ipcp.flow_init(&n1_flow);

    // Upper-layer PDU for app_flow, wrapped as the payload of a
    // lower-layer PDU for n1_flow.
    let inner = dt_pdu(9, 4, 0, true, b"nested");
    let outer = dt_pdu(42, 7, 0, true, inner.data());

    lower_ipcp.sdu_rx(outer).unwrap();
    let sdu = app_flow
        .recv(Duration::from_secs(1))
        .expect("nested SDU not delivered");
    assert_eq!(sdu.data(), b"nested");
}
