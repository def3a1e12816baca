#![forbid(unsafe_code)]

//! Compressed sparse row storage for probabilistic graphs.
//!
//! Every edge carries the probability that it exists in a given world. Out
//! lists come first and in lists second; undirected graphs store each edge in
//! both endpoints' lists and use the out lists as in lists. Each list is sorted
//! by neighbor id.

use std::fs;
use std::path::Path;

use bytes::{Buf, BufMut};
use tracing::{debug, info};

use crate::types::{Result, SageError, VertexId, NO_VERTEX};

pub mod sampling;

pub use sampling::{sample_edge, select_vertices, EdgeSampler, SamplingIndex};

const MAGIC: &[u8; 8] = b"SAGEGRPH";
const FORMAT_VERSION: u32 = 1;
const FLAG_UNDIRECTED: u32 = 1 << 0;
const FLAG_HAS_ATTR: u32 = 1 << 1;
const FLAG_HAS_PROB: u32 = 1 << 2;
const HEADER_LEN: usize = 8 + 4 + 4 + 4 + 8;
const EDGE_LEN: usize = 12;

/// A stored half-edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    /// The other endpoint.
    pub neighbor: VertexId,
    /// Probability that the edge exists in a world.
    pub probability: f32,
    /// For an in-edge `src -> dest`: the out-neighbor of `src` that follows
    /// `dest` in `src`'s out list, or [`NO_VERTEX`].
    pub next_dest: VertexId,
}

/// One input edge for [`Graph::from_edges`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeInput {
    /// Source vertex.
    pub src: VertexId,
    /// Destination vertex.
    pub dest: VertexId,
    /// Existence probability in `[0, 1]`.
    pub probability: f32,
    /// Edge attribute, e.g. a weight.
    pub attr: f32,
}

impl EdgeInput {
    /// Edge present in every world with a zero attribute.
    pub fn certain(src: VertexId, dest: VertexId) -> Self {
        Self {
            src,
            dest,
            probability: 1.0,
            attr: 0.0,
        }
    }
}

/// View of one adjacency list.
#[derive(Clone, Copy, Debug)]
pub struct EdgeList<'g> {
    edges: &'g [Edge],
    attrs: Option<&'g [f32]>,
    first: usize,
}

impl<'g> EdgeList<'g> {
    /// Number of edges in the list.
    pub fn degree(&self) -> usize {
        self.edges.len()
    }

    /// True for an isolated vertex.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edge at position `i`.
    pub fn get(&self, i: usize) -> &'g Edge {
        &self.edges[i]
    }

    /// Last edge, which has the largest neighbor id.
    pub fn last(&self) -> Option<&'g Edge> {
        self.edges.last()
    }

    /// Position of edge `i` in the graph-wide edge array.
    pub fn global_index(&self, i: usize) -> usize {
        self.first + i
    }

    /// Attribute of edge `i`, zero when the graph has none.
    pub fn attr(&self, i: usize) -> f32 {
        self.attrs.map_or(0.0, |attrs| attrs[i])
    }

    /// All edges in neighbor order.
    pub fn iter(&self) -> std::slice::Iter<'g, Edge> {
        self.edges.iter()
    }
}

/// Immutable CSR graph.
#[derive(Clone, Debug)]
pub struct Graph {
    undirected: bool,
    max_vertex_id: VertexId,
    num_edges: usize,
    index: Vec<u64>,
    edges: Vec<Edge>,
    attrs: Option<Vec<f32>>,
}

impl Graph {
    /// Builds a graph from `edges`. Vertex ids run up to the larger of
    /// `max_vertex_id_hint` and the largest endpoint. Attributes are kept
    /// only when some edge has a non-zero one.
    pub fn from_edges(max_vertex_id_hint: VertexId, edges: &[EdgeInput], directed: bool) -> Self {
        let max_vertex_id = edges
            .iter()
            .map(|e| e.src.max(e.dest))
            .fold(max_vertex_id_hint, VertexId::max);
        let n = max_vertex_id as usize + 1;
        let keep_attrs = edges.iter().any(|e| e.attr != 0.0);

        let mut out: Vec<Vec<(Edge, f32)>> = vec![Vec::new(); n];
        let mut inn: Vec<Vec<(Edge, f32)>> = if directed {
            vec![Vec::new(); n]
        } else {
            Vec::new()
        };
        let half = |neighbor, probability| Edge {
            neighbor,
            probability,
            next_dest: NO_VERTEX,
        };
        for e in edges {
            out[e.src as usize].push((half(e.dest, e.probability), e.attr));
            if directed {
                inn[e.dest as usize].push((half(e.src, e.probability), e.attr));
            } else if e.src != e.dest {
                out[e.dest as usize].push((half(e.src, e.probability), e.attr));
            }
        }
        for list in out.iter_mut().chain(inn.iter_mut()) {
            list.sort_by_key(|(edge, _)| edge.neighbor);
        }

        // next_dest of in-edge src -> dest follows dest in src's out list.
        let follow = |out: &[Vec<(Edge, f32)>], src: VertexId, dest: VertexId| {
            let list = &out[src as usize];
            let pos = list.partition_point(|(edge, _)| edge.neighbor <= dest);
            list.get(pos).map_or(NO_VERTEX, |(edge, _)| edge.neighbor)
        };
        if directed {
            for (dest, list) in inn.iter_mut().enumerate() {
                for (edge, _) in list.iter_mut() {
                    edge.next_dest = follow(out.as_slice(), edge.neighbor, dest as VertexId);
                }
            }
        } else {
            let snapshot = out.clone();
            for (dest, list) in out.iter_mut().enumerate() {
                for (edge, _) in list.iter_mut() {
                    edge.next_dest = follow(snapshot.as_slice(), edge.neighbor, dest as VertexId);
                }
            }
        }

        let num_edges = out.iter().map(Vec::len).sum();
        let lists = out.into_iter().chain(inn);
        let mut index = Vec::with_capacity(if directed { 2 * n + 1 } else { n + 1 });
        let mut flat = Vec::new();
        let mut attrs = Vec::new();
        index.push(0);
        for list in lists {
            for (edge, attr) in list {
                flat.push(edge);
                attrs.push(attr);
            }
            index.push(flat.len() as u64);
        }
        Self {
            undirected: !directed,
            max_vertex_id,
            num_edges,
            index,
            edges: flat,
            attrs: keep_attrs.then_some(attrs),
        }
    }

    /// True when in lists are the out lists.
    pub fn is_undirected(&self) -> bool {
        self.undirected
    }

    /// Largest vertex id.
    pub fn max_vertex_id(&self) -> VertexId {
        self.max_vertex_id
    }

    /// Number of vertices, `max_vertex_id + 1`.
    pub fn num_vertices(&self) -> usize {
        self.max_vertex_id as usize + 1
    }

    /// Number of out-edges over all vertices.
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// True when edges carry attributes.
    pub fn has_edge_attrs(&self) -> bool {
        self.attrs.is_some()
    }

    /// True when some edge is uncertain.
    pub fn has_probabilities(&self) -> bool {
        self.edges.iter().any(|e| e.probability != 1.0)
    }

    fn list(&self, slot: usize) -> EdgeList<'_> {
        let start = self.index[slot] as usize;
        let end = self.index[slot + 1] as usize;
        EdgeList {
            edges: &self.edges[start..end],
            attrs: self.attrs.as_deref().map(|a| &a[start..end]),
            first: start,
        }
    }

    /// Out-edges of `vertex`.
    pub fn out_edges(&self, vertex: VertexId) -> EdgeList<'_> {
        self.list(vertex as usize)
    }

    /// In-edges of `vertex`; each edge's `neighbor` is a source.
    pub fn in_edges(&self, vertex: VertexId) -> EdgeList<'_> {
        if self.undirected {
            self.list(vertex as usize)
        } else {
            self.list(self.num_vertices() + vertex as usize)
        }
    }

    /// Out-degree of `vertex`.
    pub fn out_degree(&self, vertex: VertexId) -> usize {
        self.out_edges(vertex).degree()
    }

    /// In-degree of `vertex`.
    pub fn in_degree(&self, vertex: VertexId) -> usize {
        self.in_edges(vertex).degree()
    }

    /// Length of the graph-wide edge array.
    pub fn num_stored_edges(&self) -> usize {
        self.edges.len()
    }

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.undirected {
            flags |= FLAG_UNDIRECTED;
        }
        if self.attrs.is_some() {
            flags |= FLAG_HAS_ATTR;
        }
        if self.has_probabilities() {
            flags |= FLAG_HAS_PROB;
        }
        flags
    }

    /// Serializes the graph in the binary format.
    pub fn encode(&self) -> Vec<u8> {
        let attr_len = self.attrs.as_ref().map_or(0, |a| a.len() * 4);
        let mut buf = Vec::with_capacity(
            HEADER_LEN + self.index.len() * 8 + self.edges.len() * EDGE_LEN + attr_len + 4,
        );
        buf.put_slice(MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(self.flags());
        buf.put_u32_le(self.max_vertex_id);
        buf.put_u64_le(self.edges.len() as u64);
        for &offset in &self.index {
            buf.put_u64_le(offset);
        }
        for edge in &self.edges {
            buf.put_u32_le(edge.neighbor);
            buf.put_f32_le(edge.probability);
            buf.put_u32_le(edge.next_dest);
        }
        if let Some(attrs) = &self.attrs {
            for &attr in attrs {
                buf.put_f32_le(attr);
            }
        }
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf
    }

    /// Parses the binary format.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + 4 {
            return Err(SageError::Corruption("graph file shorter than header"));
        }
        let (body, trailer) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != expected {
            return Err(SageError::Corruption("graph checksum mismatch"));
        }
        let mut buf = body;
        if &buf[..8] != MAGIC {
            return Err(SageError::Corruption("bad graph magic"));
        }
        buf.advance(8);
        if buf.get_u32_le() != FORMAT_VERSION {
            return Err(SageError::Corruption("unsupported graph format version"));
        }
        let flags = buf.get_u32_le();
        let max_vertex_id = buf.get_u32_le();
        let stored = buf.get_u64_le() as usize;
        let undirected = flags & FLAG_UNDIRECTED != 0;
        let n = max_vertex_id as usize + 1;
        let lists = if undirected { n } else { 2 * n };
        let attr_len = if flags & FLAG_HAS_ATTR != 0 { stored * 4 } else { 0 };
        if buf.remaining() != (lists + 1) * 8 + stored * EDGE_LEN + attr_len {
            return Err(SageError::Corruption("graph body length mismatch"));
        }
        let index: Vec<u64> = (0..=lists).map(|_| buf.get_u64_le()).collect();
        if index.first() != Some(&0)
            || index.last() != Some(&(stored as u64))
            || index.windows(2).any(|w| w[0] > w[1])
        {
            return Err(SageError::Corruption("graph index not monotonic"));
        }
        let edges: Vec<Edge> = (0..stored)
            .map(|_| Edge {
                neighbor: buf.get_u32_le(),
                probability: buf.get_f32_le(),
                next_dest: buf.get_u32_le(),
            })
            .collect();
        if edges.iter().any(|e| e.neighbor > max_vertex_id) {
            return Err(SageError::Corruption("edge neighbor out of range"));
        }
        let attrs = (attr_len > 0).then(|| (0..stored).map(|_| buf.get_f32_le()).collect());
        let num_edges = index[n] as usize;
        Ok(Self {
            undirected,
            max_vertex_id,
            num_edges,
            index,
            edges,
            attrs,
        })
    }

    /// Writes the binary format to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.encode())?;
        debug!(path = %path.display(), edges = self.num_edges, "graph.save");
        Ok(())
    }

    /// Reads the binary format from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let graph = Self::decode(&fs::read(path)?)?;
        info!(
            path = %path.display(),
            vertices = graph.num_vertices(),
            edges = graph.num_edges,
            undirected = graph.undirected,
            "graph.load"
        );
        Ok(graph)
    }

    /// Parses a whitespace-separated edge list, one `src dest [prob [attr]]`
    /// per line. Blank lines and lines starting with `#` are skipped.
    pub fn parse_text(text: &str, directed: bool) -> Result<Self> {
        let mut edges = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |what: &str| SageError::InvalidOwned(format!("line {}: {what}", lineno + 1));
            let mut fields = line.split_whitespace();
            let mut vertex = |name: &str| -> Result<VertexId> {
                let raw = fields.next().ok_or_else(|| bad(&format!("missing {name}")))?;
                let id: VertexId = raw.parse().map_err(|_| bad(&format!("bad {name} `{raw}`")))?;
                if id == NO_VERTEX {
                    return Err(bad(&format!("{name} id is reserved")));
                }
                Ok(id)
            };
            let src = vertex("source")?;
            let dest = vertex("destination")?;
            let mut number = |name: &str, default: f32| -> Result<f32> {
                match fields.next() {
                    None => Ok(default),
                    Some(raw) => raw.parse().map_err(|_| bad(&format!("bad {name} `{raw}`"))),
                }
            };
            let probability = number("probability", 1.0)?;
            let attr = number("attribute", 0.0)?;
            if !(0.0..=1.0).contains(&probability) {
                return Err(bad("probability outside [0, 1]"));
            }
            edges.push(EdgeInput {
                src,
                dest,
                probability,
                attr,
            });
        }
        Ok(Self::from_edges(0, &edges, directed))
    }

    /// Reads a text edge list from `path`.
    pub fn load_text(path: impl AsRef<Path>, directed: bool) -> Result<Self> {
        Self::parse_text(&fs::read_to_string(path)?, directed)
    }
}
