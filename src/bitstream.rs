//! Placement and routing trace application.
//!
//! [`DeviceBitstream`] is the seam between the trace parsers and a
//! configuration-circuitry family: implementations own the device bit
//! vector and apply the per-placement and per-edge actions, while the
//! provided methods here own the line formats and the routing state
//! machine.

use std::collections::HashSet;
use std::io::BufRead;

use log::{error, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static PLACING_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)\s+(\d+)\s+(\d+)\s+(\d+)\s+#\d+$").unwrap());
static NET_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Net\s+\d+\s+\((\S+)\)$").unwrap());
static NODE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Node:\s+(\d+)\s+(SOURCE|OPIN|CHANX|CHANY|IPIN|SINK)\s+.*$").unwrap()
});
static GLOBAL_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Net\s+\d+\s+\((\S+)\):\s+global\s+net\s+connecting:$").unwrap());
static GLOBAL_NODE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Block\s+(\S+)\s+\(#\d+\)\s+at\s+\(\d+,\d+\),\s+Pin\s+class\s+\d+\.$").unwrap()
});

#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("placing result file error: {0}")]
    BadFile(String),
    #[error("placing block instance '{0}' failed")]
    PlacingFailed(String),
    #[error("{expected} blocks found in packing result, {placed} placed")]
    MismatchWithPackingResult { expected: usize, placed: usize },
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("routing result file error: {0}")]
    BadFile(String),
    #[error("no route from node {0} to node {1}")]
    RoutingFailed(u64, u64),
    #[error("line {0}: {1}")]
    FormatError(u32, String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Source,
    Opin,
    Chanx,
    Chany,
    Ipin,
    Sink,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoutingState {
    Init,
    Global,
    Net,
    Source,
    Opin,
    Segment,
    Ipin,
    Sink,
}

/// A device bitstream under construction, able to take the placement and
/// routing effects of one configuration-circuitry family.
pub trait DeviceBitstream {
    /// Stamp a packed block instance at fabric position `(x, y, subblock)`.
    fn place_block_instance(
        &mut self,
        name: &str,
        x: u32,
        y: u32,
        subblock: u32,
    ) -> Result<(), PlaceError>;

    /// Apply the actions of the routing-graph edge `(src, sink)`.
    fn route_connection(&mut self, src: u64, sink: u64) -> Result<(), RouteError>;

    /// Walk a placement trace, stamping every placed block instance.
    /// `expected` is the packing manager's block-instance count; the number
    /// of placed lines must match it exactly.
    fn parse_placing_result(
        &mut self,
        input: impl BufRead,
        expected: usize,
    ) -> Result<usize, PlaceError>
    where
        Self: Sized,
    {
        let mut placed = 0usize;
        let mut lineno = 0u32;
        for line in input.lines() {
            lineno += 1;
            let line = line.map_err(|err| {
                error!("[PLACE] Placing result file error: {err}");
                PlaceError::BadFile(err.to_string())
            })?;
            let Some(caps) = PLACING_LINE_RE.captures(&line) else {
                continue;
            };
            let name = &caps[1];
            let (x, y, subblock) = parse_position(&caps).ok_or_else(|| {
                error!("[PLACE] line {lineno}: position out of range");
                PlaceError::BadFile(format!("line {lineno}: position out of range"))
            })?;
            trace!("[PLACE] line {lineno}: Placing '{name}' at ({x}, {y}, {subblock})");
            self.place_block_instance(name, x, y, subblock)?;
            placed += 1;
        }

        if placed != expected {
            error!("[PLACE] {expected} blocks found in packing result, {placed} placed");
            return Err(PlaceError::MismatchWithPackingResult { expected, placed });
        }
        trace!("[PLACE] {placed} blocks placed");
        Ok(placed)
    }

    /// Walk a routing trace net by net, applying every traversed edge.
    /// Returns the number of closed nets.
    fn parse_routing_result(&mut self, input: impl BufRead) -> Result<usize, RouteError>
    where
        Self: Sized,
    {
        let mut state = RoutingState::Init;
        let mut routed = 0usize;
        let mut lineno = 0u32;
        let mut prev_node = 0u64;
        let mut cur_net = String::new();
        let mut connected: HashSet<u64> = HashSet::new();

        for line in input.lines() {
            lineno += 1;
            let line = line.map_err(|err| {
                error!("[ROUTE] Routing result file error: {err}");
                RouteError::BadFile(err.to_string())
            })?;
            if line.trim().is_empty() {
                continue;
            }

            match state {
                RoutingState::Init => {
                    if let Some(caps) = NET_LINE_RE.captures(&line) {
                        cur_net = caps[1].to_owned();
                        trace!("[ROUTE] line {lineno}: Parsing net {cur_net}");
                        state = RoutingState::Net;
                    } else if let Some(caps) = GLOBAL_LINE_RE.captures(&line) {
                        cur_net = caps[1].to_owned();
                        trace!("[ROUTE] line {lineno}: Parsing global net {cur_net}");
                        state = RoutingState::Global;
                    } else {
                        trace!("[ROUTE] line {lineno}: Ignoring preamble text");
                    }
                }
                RoutingState::Global => {
                    if let Some(caps) = NET_LINE_RE.captures(&line) {
                        cur_net = caps[1].to_owned();
                        trace!("[ROUTE] line {lineno}: Parsing net {cur_net}");
                        state = RoutingState::Net;
                    } else if let Some(caps) = GLOBAL_LINE_RE.captures(&line) {
                        cur_net = caps[1].to_owned();
                        trace!("[ROUTE] line {lineno}: Parsing global net {cur_net}");
                        state = RoutingState::Global;
                    } else if GLOBAL_NODE_LINE_RE.is_match(&line) {
                        // global nets carry no routing configuration
                    } else {
                        error!("[ROUTE] line {lineno}: Expecting global node or next net");
                        return Err(RouteError::FormatError(
                            lineno,
                            "expecting global node or next net".into(),
                        ));
                    }
                }
                RoutingState::Net => {
                    connected.clear();
                    match node_line(&line, lineno)? {
                        Some((id, NodeKind::Source)) => {
                            prev_node = id;
                            connected.insert(prev_node);
                            state = RoutingState::Source;
                        }
                        _ => {
                            error!("[ROUTE] line {lineno}: Expecting 'SOURCE' node");
                            return Err(RouteError::FormatError(
                                lineno,
                                "expecting 'SOURCE' node".into(),
                            ));
                        }
                    }
                }
                RoutingState::Source => match node_line(&line, lineno)? {
                    Some((id, NodeKind::Opin)) => {
                        self.route_connection(prev_node, id)?;
                        connected.insert(id);
                        prev_node = id;
                        state = RoutingState::Opin;
                    }
                    _ => {
                        error!("[ROUTE] line {lineno}: Expecting 'OPIN' node");
                        return Err(RouteError::FormatError(
                            lineno,
                            "expecting 'OPIN' node".into(),
                        ));
                    }
                },
                RoutingState::Opin | RoutingState::Segment => match node_line(&line, lineno)? {
                    Some((id, kind @ (NodeKind::Chanx | NodeKind::Chany | NodeKind::Ipin))) => {
                        self.route_connection(prev_node, id)?;
                        connected.insert(id);
                        prev_node = id;
                        state = if kind == NodeKind::Ipin {
                            RoutingState::Ipin
                        } else {
                            RoutingState::Segment
                        };
                    }
                    _ => {
                        error!("[ROUTE] line {lineno}: Expecting 'CHANX', 'CHANY', or 'IPIN' node");
                        return Err(RouteError::FormatError(
                            lineno,
                            "expecting 'CHANX', 'CHANY', or 'IPIN' node".into(),
                        ));
                    }
                },
                RoutingState::Ipin => match node_line(&line, lineno)? {
                    Some((id, NodeKind::Sink)) => {
                        self.route_connection(prev_node, id)?;
                        connected.insert(id);
                        prev_node = id;
                        state = RoutingState::Sink;
                    }
                    _ => {
                        error!("[ROUTE] line {lineno}: Expecting 'SINK' node");
                        return Err(RouteError::FormatError(
                            lineno,
                            "expecting 'SINK' node".into(),
                        ));
                    }
                },
                RoutingState::Sink => {
                    if let Some(caps) = NET_LINE_RE.captures(&line) {
                        routed += 1;
                        cur_net = caps[1].to_owned();
                        trace!("[ROUTE] line {lineno}: Parsing net {cur_net}");
                        state = RoutingState::Net;
                    } else if let Some(caps) = GLOBAL_LINE_RE.captures(&line) {
                        routed += 1;
                        cur_net = caps[1].to_owned();
                        trace!("[ROUTE] line {lineno}: Parsing global net {cur_net}");
                        state = RoutingState::Global;
                    } else if let Some((id, kind)) = node_line(&line, lineno)? {
                        state = match kind {
                            NodeKind::Opin => RoutingState::Opin,
                            NodeKind::Chanx | NodeKind::Chany => RoutingState::Segment,
                            _ => {
                                error!(
                                    "[ROUTE] line {lineno}: Expecting 'OPIN', 'CHANX', or 'CHANY' node"
                                );
                                return Err(RouteError::FormatError(
                                    lineno,
                                    "expecting 'OPIN', 'CHANX', or 'CHANY' node".into(),
                                ));
                            }
                        };
                        prev_node = id;
                        if !connected.contains(&prev_node) {
                            error!(
                                "[ROUTE] line {lineno}: Node '{prev_node}' is not connected in this net"
                            );
                            return Err(RouteError::FormatError(
                                lineno,
                                format!("node {prev_node} is not connected in this net"),
                            ));
                        }
                    } else {
                        error!(
                            "[ROUTE] line {lineno}: Expecting 'OPIN', 'CHANX', or 'CHANY' node or next net"
                        );
                        return Err(RouteError::FormatError(
                            lineno,
                            "expecting a branch node or the next net".into(),
                        ));
                    }
                }
            }
        }

        trace!("[ROUTE] # nets routed: {routed}");
        Ok(routed)
    }
}

fn parse_position(caps: &regex::Captures) -> Option<(u32, u32, u32)> {
    let x = caps[2].parse().ok()?;
    let y = caps[3].parse().ok()?;
    let subblock = caps[4].parse().ok()?;
    Some((x, y, subblock))
}

fn node_line(line: &str, lineno: u32) -> Result<Option<(u64, NodeKind)>, RouteError> {
    let Some(caps) = NODE_LINE_RE.captures(line) else {
        return Ok(None);
    };
    let id = caps[1].parse::<u64>().map_err(|_| {
        error!("[ROUTE] line {lineno}: node id out of range");
        RouteError::FormatError(lineno, "node id out of range".into())
    })?;
    let kind = match &caps[2] {
        "SOURCE" => NodeKind::Source,
        "OPIN" => NodeKind::Opin,
        "CHANX" => NodeKind::Chanx,
        "CHANY" => NodeKind::Chany,
        "IPIN" => NodeKind::Ipin,
        _ => NodeKind::Sink,
    };
    Ok(Some((id, kind)))
}
