use rstest::rstest;

use std::io::{Cursor, Write};

use crate::bitchain::{BitchainBitstream, BitchainError, BitchainPacking, BITCHAIN_SIGNATURE};
use crate::bits::{Action, BitVec, SliceAction};
use crate::bitstream::{DeviceBitstream, PlaceError, RouteError};
use crate::config_db::schema::{
    BlockAction, BlockMsg, ConnectionAction, ConnectionMsg, EdgeMsg, Header, HeaderAction,
    InstanceAction, InstanceMsg, ModeAction, ModeMsg, Packet, PlacementAction, PlacementMsg,
    PortBitMsg, PortMsg, RoutingAction,
};
use crate::config_db::{ConfigDatabase, DatabaseError, DATABASE_MAGIC};
use crate::memh;
use crate::pack::{ConfigCircuitry, PackError, PackingManager};
use crate::synth::{BlifError, LogicValue, LutError, LutInstance, SynthResultManager};

fn bv(bits: &[u8]) -> BitVec {
    bits.iter().map(|&b| b != 0).collect()
}

fn action(offset: u64, width: u64, value: u64) -> Action {
    Action { offset, width, value }
}

fn slice(offset: u64, width: u64, begin: u64) -> SliceAction {
    SliceAction { offset, width, begin }
}

fn encode_db(header: &Header, packets: &[Packet]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&DATABASE_MAGIC.to_le_bytes());
    let record = bincode::serialize(header).unwrap();
    out.extend_from_slice(&(record.len() as u32).to_le_bytes());
    out.extend_from_slice(&record);
    for packet in packets {
        let record = bincode::serialize(packet).unwrap();
        out.extend_from_slice(&(record.len() as u32).to_le_bytes());
        out.extend_from_slice(&record);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

fn test_header(signature: u64, total_size: Option<u64>) -> Header {
    Header {
        width: 2,
        height: 2,
        node_size: 10,
        signature,
        action: total_size.map(|total_size| HeaderAction { total_size }),
    }
}

fn conn(input: &str, actions: Option<Vec<Action>>) -> ConnectionMsg {
    ConnectionMsg {
        input: input.to_owned(),
        action: actions.map(|actions| ConnectionAction { actions }),
    }
}

/// An 8-bit CLB: a LUT instance whose rotated table lands in bits 0-3 and
/// whose input mux drives bits 4-5, a multi-mode instance whose latch mode
/// sets bit 5, and the block output mux on bits 6-7.
fn clb_block() -> BlockMsg {
    BlockMsg {
        name: "clb".to_owned(),
        ports: vec![PortMsg {
            name: "out".to_owned(),
            bits: vec![PortBitMsg {
                connections: vec![
                    conn("lut[0].out[0]", Some(vec![action(6, 2, 3)])),
                    conn("ble.q[0]", None),
                ],
            }],
        }],
        instances: vec![
            InstanceMsg {
                name: "lut".to_owned(),
                kind: 0,
                ports: vec![PortMsg {
                    name: "in".to_owned(),
                    bits: vec![
                        PortBitMsg {
                            connections: vec![
                                conn("clb.in[0]", Some(vec![action(4, 2, 2)])),
                                conn("clb.in[1]", None),
                            ],
                        },
                        PortBitMsg {
                            connections: vec![conn("clb.in[2]", None)],
                        },
                    ],
                }],
                modes: vec![],
                action: Some(InstanceAction {
                    lut_actions: vec![slice(0, 4, 0)],
                }),
            },
            InstanceMsg {
                name: "ble".to_owned(),
                kind: 1,
                ports: vec![],
                modes: vec![
                    ModeMsg {
                        name: "latch".to_owned(),
                        action: Some(ModeAction {
                            actions: vec![action(5, 1, 1)],
                        }),
                    },
                    ModeMsg {
                        name: "comb".to_owned(),
                        action: None,
                    },
                ],
                action: None,
            },
        ],
        action: Some(BlockAction {
            config_size: Some(8),
        }),
    }
}

fn test_db() -> ConfigDatabase {
    let packet = Packet {
        blocks: vec![clb_block()],
        placements: vec![
            PlacementMsg {
                x: 0,
                y: 0,
                subblock: 0,
                action: Some(PlacementAction {
                    actions: vec![slice(0, 8, 0)],
                }),
            },
            PlacementMsg {
                x: 1,
                y: 0,
                subblock: 0,
                action: Some(PlacementAction {
                    actions: vec![slice(8, 8, 0)],
                }),
            },
        ],
        edges: vec![
            EdgeMsg {
                src: 2,
                sink: 3,
                action: Some(RoutingAction {
                    actions: vec![action(15, 1, 1)],
                }),
            },
            EdgeMsg { src: 3, sink: 4, action: None },
            EdgeMsg { src: 4, sink: 5, action: None },
            EdgeMsg { src: 5, sink: 6, action: None },
        ],
    };
    let bytes = encode_db(&test_header(BITCHAIN_SIGNATURE, Some(16)), &[packet]);
    ConfigDatabase::read(&mut Cursor::new(bytes)).unwrap()
}

const TEST_BLIF: &str = "\
# synthesized by test
.model top
.inputs a
.outputs n1
.names a n1
1 1
.end
";

const TEST_NET: &str = r#"<block name="top" instance="top[0]">
  <inputs>a</inputs>
  <outputs>o</outputs>
  <clocks/>
  <block name="unit_0" instance="clb[0]">
    <inputs>
      <port name="in">open open</port>
    </inputs>
    <outputs>
      <port name="out">lut[0].out[0]->mux0</port>
    </outputs>
    <block name="n1" instance="lut[0]">
      <inputs>
        <port name="in">clb.in[0]->mux1 open</port>
      </inputs>
      <outputs>
        <port name="out">n1</port>
      </outputs>
      <block name="n1" instance="lut_leaf[0]">
        <inputs>
          <port_rotation_map>0 open</port_rotation_map>
        </inputs>
      </block>
    </block>
  </block>
  <block name="unit_1" instance="clb[0]">
    <block name="q" instance="ble[0]" mode="latch"></block>
    <block name="open" instance="lut[0]" mode="wire">
      <inputs>
        <port name="in">clb.in[0]->w open</port>
      </inputs>
    </block>
  </block>
  <block name="unit_2" instance="clb[0]">
    <block name="open" instance="lut[0]">
      <inputs>
        <port name="in">open open</port>
      </inputs>
      <block name="open" instance="lut_leaf[0]">
        <inputs>
          <port_rotation_map>open open</port_rotation_map>
        </inputs>
      </block>
    </block>
  </block>
</block>
"#;

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn packed_test_design(db: &ConfigDatabase, synth: &SynthResultManager) -> BitchainPacking {
    let net = write_temp(TEST_NET);
    let mut pack_mgr = PackingManager::new(db, synth, BitchainPacking::new());
    pack_mgr.parse(net.path()).unwrap();
    pack_mgr.into_circuitry()
}

#[derive(Default)]
struct RecordingBitstream {
    placed: Vec<(String, u32, u32, u32)>,
    routed: Vec<(u64, u64)>,
}

impl DeviceBitstream for RecordingBitstream {
    fn place_block_instance(
        &mut self,
        name: &str,
        x: u32,
        y: u32,
        subblock: u32,
    ) -> Result<(), PlaceError> {
        self.placed.push((name.to_owned(), x, y, subblock));
        Ok(())
    }

    fn route_connection(&mut self, src: u64, sink: u64) -> Result<(), RouteError> {
        self.routed.push((src, sink));
        Ok(())
    }
}

#[test]
fn bitvec_read_write() {
    let mut bits = BitVec::zeroed(70);
    assert_eq!(bits.len(), 70);
    assert!(!bits.get(69));
    bits.set(69, true);
    bits.set(0, true);
    assert!(bits.get(69));
    assert!(bits.get(0));
    assert!(!bits.get(1));
    bits.set(69, false);
    assert!(!bits.get(69));

    let filled = BitVec::filled(5, true);
    assert!(filled.iter().all(|b| b));
}

#[test]
fn action_reapplication_is_idempotent() {
    let actions = [action(0, 3, 0b101), action(7, 4, 0b1111), action(2, 2, 0)];
    let mut first = BitVec::zeroed(12);
    let mut second = BitVec::zeroed(12);
    for a in &actions {
        first.apply(a);
    }
    for a in &actions {
        second.apply(a);
        second.apply(a);
    }
    assert_eq!(first, second);
}

#[test]
fn action_writes_low_bits_of_value() {
    let mut bits = BitVec::zeroed(8);
    bits.apply(&action(2, 4, 0xa));
    assert_eq!(bits, bv(&[0, 0, 0, 1, 0, 1, 0, 0]));
}

#[test]
fn slice_action_copies_between_vectors() {
    let src = bv(&[1, 1, 0, 1]);
    let mut dst = BitVec::zeroed(8);
    dst.apply_slice(&slice(3, 3, 1), &src);
    assert_eq!(dst, bv(&[0, 0, 0, 1, 0, 1, 0, 0]));
}

#[test]
fn verilog_rendering() {
    assert_eq!(BitVec::zeroed(0).to_verilog(), "0'h0");
    assert_eq!(bv(&[1, 0, 1, 1, 0, 1, 1, 0]).to_verilog(), "8'h6d");
    assert_eq!(bv(&[0, 1]).to_verilog(), "2'h2");
}

#[test]
fn lut_or_of_two_inputs() {
    let synth = SynthResultManager::read(Cursor::new(
        ".model top\n.inputs a b\n.outputs c\n.names a b c\n-1 1\n1- 1\n.end\n",
    ))
    .unwrap();
    let lut = synth.lut("c").unwrap();
    assert_eq!(*lut.table(), bv(&[0, 1, 1, 1]));
}

#[test]
fn lut_off_set_polarity() {
    let lut = LutInstance::populate(
        3,
        &[vec![LogicValue::True, LogicValue::DontCare, LogicValue::False]],
    )
    .unwrap();
    assert_eq!(*lut.table(), bv(&[1, 0, 1, 0]));
}

#[test]
fn lut_all_dont_cares_covers_every_index() {
    let lut = LutInstance::populate(
        3,
        &[vec![LogicValue::DontCare, LogicValue::DontCare, LogicValue::True]],
    )
    .unwrap();
    assert!(lut.table().iter().all(|b| b));
}

#[test]
fn lut_populate_errors() {
    use LogicValue::*;

    assert!(matches!(
        LutInstance::populate(3, &[vec![True, True]]),
        Err(LutError::NetsAndTruthTableMismatch)
    ));
    assert!(matches!(
        LutInstance::populate(3, &[vec![True, True, True], vec![False, False, False]]),
        Err(LutError::InconsistentTruthTableEntry)
    ));
    assert!(matches!(
        LutInstance::populate(3, &[vec![Unknown, True, True]]),
        Err(LutError::InvalidTruthTableSymbol)
    ));
    assert!(matches!(
        LutInstance::populate(3, &[vec![True, True, DontCare]]),
        Err(LutError::InvalidTruthTableSymbol)
    ));
}

#[test]
fn lut_rotation() {
    let synth = SynthResultManager::read(Cursor::new(
        ".model top\n.inputs a b\n.outputs c\n.names a b c\n1- 1\n.end\n",
    ))
    .unwrap();
    let lut = synth.lut("c").unwrap();
    assert_eq!(*lut.table(), bv(&[0, 1, 0, 1]));
    assert_eq!(lut.rotate(&[1, 0]), bv(&[0, 0, 1, 1]));
}

#[test]
fn lut_identity_rotation_round_trips() {
    let synth = SynthResultManager::read(Cursor::new(
        ".model top\n.inputs a b\n.outputs c\n.names a b c\n01 1\n.end\n",
    ))
    .unwrap();
    let lut = synth.lut("c").unwrap();
    assert_eq!(lut.rotate(&[0, 1]), *lut.table());
}

#[test]
fn lut_rotation_ignores_unused_inputs() {
    let synth = SynthResultManager::read(Cursor::new(
        ".model top\n.inputs a\n.outputs c\n.names a c\n1 1\n.end\n",
    ))
    .unwrap();
    let lut = synth.lut("c").unwrap();
    assert_eq!(lut.rotate(&[0, -1]), bv(&[0, 1, 0, 1]));
}

#[test]
fn blif_single_input_names_is_accepted() {
    let synth = SynthResultManager::read(Cursor::new(
        ".model top\n.outputs c\n.names c\n1\n.end\n",
    ))
    .unwrap();
    assert_eq!(*synth.lut("c").unwrap().table(), bv(&[1]));
}

#[test]
fn blif_continuation_lines_are_joined() {
    let synth = SynthResultManager::read(Cursor::new(
        ".model top\n.inputs a b\n.outputs c\n.names a \\\nb c\n11 1\n.end\n",
    ))
    .unwrap();
    assert_eq!(*synth.lut("c").unwrap().table(), bv(&[0, 0, 0, 1]));
}

#[test]
fn blif_ignores_latches_and_subckts() {
    let synth = SynthResultManager::read(Cursor::new(
        ".model top\n.inputs a clk\n.outputs q\n.names a n1\n1 1\n.latch n1 q re clk 0\n.subckt mem in=a out=q\n.end\n",
    ))
    .unwrap();
    assert_eq!(synth.luts().len(), 1);
}

#[test]
fn blif_state_machine_violations() {
    assert!(matches!(
        SynthResultManager::read(Cursor::new(".model a\n.end\n.model b\n.end\n")),
        Err(BlifError::MultipleModels(_))
    ));
    assert!(matches!(
        SynthResultManager::read(Cursor::new(".model a\n.names x y\n1 1\n.names x y\n0 1\n.end\n")),
        Err(BlifError::LutNameConflicts(_, _))
    ));
    assert!(matches!(
        SynthResultManager::read(Cursor::new(".model a\n.names x y\n1 1\n")),
        Err(BlifError::Incomplete)
    ));
    assert!(matches!(
        SynthResultManager::read(Cursor::new(".names x y\n1 1\n.end\n")),
        Err(BlifError::InvalidState(_))
    ));
    assert!(matches!(
        SynthResultManager::read(Cursor::new(".model a\n.names x y\nz 1\n.end\n")),
        Err(BlifError::ParserError(_, _))
    ));
}

#[test]
fn config_db_rejects_wrong_magic() {
    let mut input = Cursor::new(vec![0u8; 16]);
    assert!(matches!(
        ConfigDatabase::read(&mut input),
        Err(DatabaseError::BadFile(_))
    ));
}

#[test]
fn config_db_round_trip() {
    let db = test_db();
    assert_eq!(db.signature(), BITCHAIN_SIGNATURE);
    assert_eq!(db.header_action().unwrap().total_size, 16);
    assert_eq!(db.blocks().len(), 1);

    let block = db.block("clb").unwrap();
    assert_eq!(block.action().unwrap().config_size, Some(8));
    assert!(block.port("out").is_some());
    assert!(block.port("nope").is_none());

    let lut = block.instance("lut").unwrap();
    let bit = lut.port("in").unwrap().bit(0).unwrap();
    assert!(!bit.is_hardwired());
    assert_eq!(bit.connection_actions("clb.in[0]").unwrap().len(), 1);
    assert!(bit.connection_actions("clb.in[1]").is_none());
    assert!(bit.connection_actions("open").is_none());
    assert!(lut.port("in").unwrap().bit(1).unwrap().is_hardwired());
    assert!(lut.port("in").unwrap().bit(7).is_none());

    assert_eq!(db.edge_actions(2, 3).unwrap().len(), 1);
    assert_eq!(db.edge_actions(3, 4).unwrap().len(), 0);
    assert!(db.edge_actions(7, 8).is_none());

    assert_eq!(db.placement_actions(0, 0, 0).unwrap().len(), 1);
    assert!(db.placement_actions(0, 1, 0).is_none());
    assert!(db.placement_actions(0, 0, 3).is_none());
    assert!(db.placement_actions(5, 5, 0).is_none());
}

#[test]
fn config_db_accumulates_parallel_edges() {
    let packet = Packet {
        blocks: vec![],
        placements: vec![],
        edges: vec![
            EdgeMsg {
                src: 1,
                sink: 2,
                action: Some(RoutingAction { actions: vec![action(0, 1, 1)] }),
            },
            EdgeMsg {
                src: 1,
                sink: 2,
                action: Some(RoutingAction { actions: vec![action(1, 1, 1)] }),
            },
        ],
    };
    let bytes = encode_db(&test_header(1, None), &[packet]);
    let db = ConfigDatabase::read(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(db.edge_actions(1, 2).unwrap().len(), 2);
}

#[test]
fn config_db_rejects_duplicated_blocks() {
    let packet = Packet {
        blocks: vec![clb_block(), clb_block()],
        placements: vec![],
        edges: vec![],
    };
    let bytes = encode_db(&test_header(1, None), &[packet]);
    assert!(matches!(
        ConfigDatabase::read(&mut Cursor::new(bytes)),
        Err(DatabaseError::BlockNameConflict(name)) if name == "clb"
    ));
}

#[test]
fn config_db_rejects_placement_beyond_grid() {
    let packet = Packet {
        blocks: vec![],
        placements: vec![PlacementMsg { x: 2, y: 0, subblock: 0, action: None }],
        edges: vec![],
    };
    let bytes = encode_db(&test_header(1, None), &[packet]);
    assert!(matches!(
        ConfigDatabase::read(&mut Cursor::new(bytes)),
        Err(DatabaseError::BadFile(_))
    ));
}

#[test]
fn config_db_rejects_unknown_instance_type() {
    let mut block = clb_block();
    block.instances[0].kind = 9;
    let packet = Packet { blocks: vec![block], placements: vec![], edges: vec![] };
    let bytes = encode_db(&test_header(1, None), &[packet]);
    assert!(matches!(
        ConfigDatabase::read(&mut Cursor::new(bytes)),
        Err(DatabaseError::InvalidBlock(name)) if name == "clb"
    ));
}

#[test]
fn config_db_rejects_truncated_streams() {
    let mut bytes = encode_db(&test_header(1, None), &[]);
    // drop the zero terminator
    bytes.truncate(bytes.len() - 4);
    assert!(matches!(
        ConfigDatabase::read(&mut Cursor::new(bytes)),
        Err(DatabaseError::BadFile(_))
    ));

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&DATABASE_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&100u32.to_le_bytes());
    bytes.extend_from_slice(&[1, 2, 3]);
    assert!(matches!(
        ConfigDatabase::read(&mut Cursor::new(bytes)),
        Err(DatabaseError::PacketIncomplete(_))
    ));

    let header = bincode::serialize(&test_header(1, None)).unwrap();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&DATABASE_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(&[0xff, 0xff, 0xff]);
    assert!(matches!(
        ConfigDatabase::read(&mut Cursor::new(bytes)),
        Err(DatabaseError::PacketDecodeFailed(_))
    ));
}

#[test]
fn packing_folds_actions_into_block_vectors() {
    let db = test_db();
    let synth = SynthResultManager::read(Cursor::new(TEST_BLIF)).unwrap();
    let packing = packed_test_design(&db, &synth);

    assert_eq!(packing.num_block_instances(), 3);
    // rotated LUT table in bits 0-3, input mux in 4-5, output mux in 6-7
    assert_eq!(*packing.block_instance("unit_0").unwrap(), bv(&[0, 1, 0, 1, 0, 1, 1, 1]));
    // wire LUT table in bits 0-3, input mux in 4-5, latch mode in 5
    assert_eq!(*packing.block_instance("unit_1").unwrap(), bv(&[0, 1, 0, 1, 0, 1, 0, 0]));
    // unused LUT configures nothing
    assert_eq!(*packing.block_instance("unit_2").unwrap(), BitVec::zeroed(8));
}

#[test]
fn packing_rejects_unknown_names() {
    let db = test_db();
    let synth = SynthResultManager::read(Cursor::new(TEST_BLIF)).unwrap();

    let net = write_temp(
        r#"<block name="t" instance="t[0]"><block name="u" instance="nope[0]"></block></block>"#,
    );
    let mut mgr = PackingManager::new(&db, &synth, BitchainPacking::new());
    assert!(matches!(mgr.parse(net.path()), Err(PackError::MissingInConfigDb(_))));

    let net = write_temp(
        r#"<block name="t" instance="t[0]"><block name="u" instance="clb[0]"><block name="ghost" instance="lut[0]"></block></block></block>"#,
    );
    let mut mgr = PackingManager::new(&db, &synth, BitchainPacking::new());
    assert!(matches!(mgr.parse(net.path()), Err(PackError::MissingInSynthMgr(_))));

    let net = write_temp(
        r#"<block name="t" instance="t[0]"><block name="u" instance="clb"></block></block>"#,
    );
    let mut mgr = PackingManager::new(&db, &synth, BitchainPacking::new());
    assert!(matches!(mgr.parse(net.path()), Err(PackError::Format(_))));
}

#[test]
fn packing_rejects_bad_connection_tokens() {
    let db = test_db();
    let synth = SynthResultManager::read(Cursor::new(TEST_BLIF)).unwrap();
    let net = write_temp(
        r#"<block name="t" instance="t[0]"><block name="u" instance="clb[0]"><block name="n1" instance="lut[0]"><inputs><port name="in">garbage</port></inputs></block></block></block>"#,
    );
    let mut mgr = PackingManager::new(&db, &synth, BitchainPacking::new());
    assert!(matches!(mgr.parse(net.path()), Err(PackError::Format(_))));
}

#[test]
fn packing_rejects_duplicated_block_instances() {
    let db = test_db();
    let synth = SynthResultManager::read(Cursor::new(TEST_BLIF)).unwrap();
    let net = write_temp(
        r#"<block name="t" instance="t[0]"><block name="u" instance="clb[0]"></block><block name="u" instance="clb[0]"></block></block>"#,
    );
    let mut mgr = PackingManager::new(&db, &synth, BitchainPacking::new());
    assert!(matches!(mgr.parse(net.path()), Err(PackError::Internal(_))));
}

#[test]
fn packing_requires_a_complete_document() {
    let db = test_db();
    let synth = SynthResultManager::read(Cursor::new(TEST_BLIF)).unwrap();
    let net = write_temp(r#"<block name="t" instance="t[0]">"#);
    let mut mgr = PackingManager::new(&db, &synth, BitchainPacking::new());
    assert!(matches!(mgr.parse(net.path()), Err(PackError::Incomplete)));
}

#[test]
fn placement_driver_counts_matched_lines_only() {
    let mut recorder = RecordingBitstream::default();
    let input = "blk_a 2 3 0 #42\n# ignored\nNetlist of the placement\n";
    let placed = recorder.parse_placing_result(Cursor::new(input), 1).unwrap();
    assert_eq!(placed, 1);
    assert_eq!(recorder.placed, vec![("blk_a".to_owned(), 2, 3, 0)]);
}

#[test]
fn placement_driver_rejects_count_mismatches() {
    let mut recorder = RecordingBitstream::default();
    let input = "blk_a 2 3 0 #42\n";
    assert!(matches!(
        recorder.parse_placing_result(Cursor::new(input), 2),
        Err(PlaceError::MismatchWithPackingResult { expected: 2, placed: 1 })
    ));
}

#[test]
fn routing_driver_walks_a_single_net() {
    let mut recorder = RecordingBitstream::default();
    let input = "\
Net 0 (n)

Node: 1 SOURCE (0,0) Class: 0
Node: 2 OPIN (0,0) Pin: 1
Node: 3 CHANX (0,0) Track: 2
Node: 4 IPIN (1,0) Pin: 0
Node: 5 SINK (1,0) Class: 1
";
    let routed = recorder.parse_routing_result(Cursor::new(input)).unwrap();
    assert_eq!(routed, 0);
    assert_eq!(recorder.routed, vec![(1, 2), (2, 3), (3, 4), (4, 5)]);
}

#[test]
fn routing_driver_reenters_at_connected_nodes() {
    let mut recorder = RecordingBitstream::default();
    let input = "\
Net 0 (n)
Node: 1 SOURCE x
Node: 2 OPIN x
Node: 3 CHANX x
Node: 4 IPIN x
Node: 5 SINK x
Node: 3 CHANY x
Node: 6 IPIN x
Node: 7 SINK x
Net 1 (m)
Node: 8 SOURCE x
Node: 9 OPIN x
Node: 4 IPIN x
Node: 5 SINK x
";
    let routed = recorder.parse_routing_result(Cursor::new(input)).unwrap();
    assert_eq!(routed, 1);
    assert_eq!(
        recorder.routed,
        vec![(1, 2), (2, 3), (3, 4), (4, 5), (3, 6), (6, 7), (8, 9), (9, 4), (4, 5)]
    );
}

#[test]
fn routing_driver_rejects_disconnected_reentry() {
    let mut recorder = RecordingBitstream::default();
    let input = "\
Net 0 (n)
Node: 1 SOURCE x
Node: 2 OPIN x
Node: 3 CHANX x
Node: 4 IPIN x
Node: 5 SINK x
Node: 9 OPIN x
Node: 6 CHANX x
";
    assert!(matches!(
        recorder.parse_routing_result(Cursor::new(input)),
        Err(RouteError::FormatError(_, _))
    ));
}

#[test]
fn routing_driver_rejects_out_of_order_nodes() {
    let mut recorder = RecordingBitstream::default();
    let input = "Net 0 (n)\nNode: 2 OPIN x\n";
    assert!(matches!(
        recorder.parse_routing_result(Cursor::new(input)),
        Err(RouteError::FormatError(_, _))
    ));
}

#[test]
fn routing_driver_accepts_global_nets() {
    let mut recorder = RecordingBitstream::default();
    let input = "\
Net 0 (clk): global net connecting:
Block b1 (#1) at (1,1), Pin class 0.
Block b2 (#2) at (1,0), Pin class 0.
Net 1 (n)
Node: 1 SOURCE x
Node: 2 OPIN x
Node: 3 IPIN x
Node: 4 SINK x
";
    let routed = recorder.parse_routing_result(Cursor::new(input)).unwrap();
    assert_eq!(routed, 0);
    assert_eq!(recorder.routed, vec![(1, 2), (2, 3), (3, 4)]);
}

#[test]
fn routing_driver_accepts_empty_traces() {
    let mut recorder = RecordingBitstream::default();
    assert_eq!(recorder.parse_routing_result(Cursor::new("")).unwrap(), 0);
}

#[test]
fn bitchain_requires_matching_signature() {
    let bytes = encode_db(&test_header(1, Some(16)), &[]);
    let db = ConfigDatabase::read(&mut Cursor::new(bytes)).unwrap();
    let packing = BitchainPacking::new();
    assert!(matches!(
        BitchainBitstream::new(&db, &packing),
        Err(BitchainError::SignatureMismatch(1))
    ));
}

#[test]
fn bitchain_requires_a_total_size() {
    let bytes = encode_db(&test_header(BITCHAIN_SIGNATURE, None), &[]);
    let db = ConfigDatabase::read(&mut Cursor::new(bytes)).unwrap();
    let packing = BitchainPacking::new();
    assert!(matches!(
        BitchainBitstream::new(&db, &packing),
        Err(BitchainError::UnknownTotalSize)
    ));
}

#[test]
fn bitchain_zero_sized_bitstream_writes_nothing() {
    let bytes = encode_db(&test_header(BITCHAIN_SIGNATURE, Some(0)), &[]);
    let db = ConfigDatabase::read(&mut Cursor::new(bytes)).unwrap();
    let packing = BitchainPacking::new();
    let bitstream = BitchainBitstream::new(&db, &packing).unwrap();
    assert!(bitstream.bits().is_empty());

    let mut out = Vec::new();
    memh::write_memh(&mut out, bitstream.bits(), 16).unwrap();
    assert!(out.is_empty());
}

#[test]
fn bitchain_routing_applies_edge_actions() {
    let packet = Packet {
        blocks: vec![],
        placements: vec![],
        edges: vec![
            EdgeMsg {
                src: 5,
                sink: 6,
                action: Some(RoutingAction { actions: vec![action(0, 2, 3)] }),
            },
            EdgeMsg {
                src: 6,
                sink: 7,
                action: Some(RoutingAction { actions: vec![action(2, 2, 2)] }),
            },
            EdgeMsg {
                src: 7,
                sink: 8,
                action: Some(RoutingAction { actions: vec![action(4, 1, 1)] }),
            },
            EdgeMsg {
                src: 8,
                sink: 9,
                action: Some(RoutingAction { actions: vec![action(8, 4, 0xa)] }),
            },
        ],
    };
    let bytes = encode_db(&test_header(BITCHAIN_SIGNATURE, Some(16)), &[packet]);
    let db = ConfigDatabase::read(&mut Cursor::new(bytes)).unwrap();
    let packing = BitchainPacking::new();
    let mut bitstream = BitchainBitstream::new(&db, &packing).unwrap();

    let input = "\
Net 0 (n)
Node: 5 SOURCE x
Node: 6 OPIN x
Node: 7 CHANX x
Node: 8 IPIN x
Node: 9 SINK x
";
    bitstream.parse_routing_result(Cursor::new(input)).unwrap();
    assert_eq!(
        *bitstream.bits(),
        bv(&[1, 1, 0, 1, 1, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0])
    );
}

#[test]
fn bitchain_routing_rejects_missing_edges() {
    let bytes = encode_db(&test_header(BITCHAIN_SIGNATURE, Some(16)), &[]);
    let db = ConfigDatabase::read(&mut Cursor::new(bytes)).unwrap();
    let packing = BitchainPacking::new();
    let mut bitstream = BitchainBitstream::new(&db, &packing).unwrap();

    let input = "Net 0 (n)\nNode: 5 SOURCE x\nNode: 6 OPIN x\n";
    assert!(matches!(
        bitstream.parse_routing_result(Cursor::new(input)),
        Err(RouteError::RoutingFailed(5, 6))
    ));
}

#[test]
fn bitchain_placement_rejects_unpacked_blocks() {
    let db = test_db();
    let packing = BitchainPacking::new();
    let mut bitstream = BitchainBitstream::new(&db, &packing).unwrap();
    assert!(matches!(
        bitstream.place_block_instance("ghost", 0, 0, 0),
        Err(PlaceError::PlacingFailed(name)) if name == "ghost"
    ));
}

#[test]
fn memh_writer_packs_words_from_the_top() {
    let mut out = Vec::new();
    memh::write_memh(&mut out, &bv(&[1, 0, 1, 1, 0, 1, 1, 0]), 4).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "6 b\n");
}

#[test]
fn memh_writer_wraps_lines_after_four_words() {
    let bits: BitVec = (0..20).map(|i| i % 3 == 0).collect();
    let mut out = Vec::new();
    memh::write_memh(&mut out, &bits, 4).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "2 9 4 2\n9\n");
}

#[rstest]
#[case(0)]
#[case(5)]
#[case(12)]
#[case(128)]
fn memh_writer_rejects_unsupported_widths(#[case] width: u32) {
    let mut out = Vec::new();
    assert!(matches!(
        memh::write_memh(&mut out, &bv(&[1, 0]), width),
        Err(memh::MemhError::BadAlignment(_))
    ));
}

#[rstest]
#[case(4)]
#[case(8)]
#[case(16)]
fn memh_words_round_trip(#[case] width: u32) {
    let bits: BitVec = (0..64).map(|i| i % 5 == 0 || i % 7 == 0).collect();
    let mut out = Vec::new();
    memh::write_memh(&mut out, &bits, width).unwrap();
    let text = String::from_utf8(out).unwrap();

    let mut rebuilt = vec![false; bits.len()];
    let mut next = bits.len();
    for token in text.split_whitespace() {
        let word = u64::from_str_radix(token, 16).unwrap();
        for i in 0..width as usize {
            next -= 1;
            rebuilt[next] = word >> i & 1 != 0;
        }
    }
    assert_eq!(rebuilt.into_iter().collect::<BitVec>(), bits);
}

#[test]
fn pipeline_end_to_end() {
    let db = test_db();
    let synth = SynthResultManager::read(Cursor::new(TEST_BLIF)).unwrap();
    let packing = packed_test_design(&db, &synth);
    let mut bitstream = BitchainBitstream::new(&db, &packing).unwrap();

    let place = "\
Netlist_File: top.net Netlist_ID: SHA256:0
Array size: 2 x 2 logic blocks

#block name\tx\ty\tsubblk\tblock number
#----------\t--\t--\t------\t------------
unit_0\t0\t0\t0\t#0
unit_1\t1\t0\t0\t#1
unit_2\t0\t1\t0\t#2
";
    let placed = bitstream
        .parse_placing_result(Cursor::new(place), packing.num_block_instances())
        .unwrap();
    assert_eq!(placed, 3);
    assert_eq!(
        *bitstream.bits(),
        bv(&[0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 1, 0, 1, 0, 0])
    );

    let route = "\
Placement_File: top.place Placement_ID: SHA256:0

Net 0 (o)
Node: 2 SOURCE x
Node: 3 OPIN x
Node: 4 CHANX x
Node: 5 IPIN x
Node: 6 SINK x
";
    bitstream.parse_routing_result(Cursor::new(route)).unwrap();
    assert_eq!(
        *bitstream.bits(),
        bv(&[0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 1, 0, 1, 0, 1])
    );

    let mut out = Vec::new();
    memh::write_memh(&mut out, bitstream.bits(), 4).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "5 5 7 5\n");
}
