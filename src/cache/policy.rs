use crate::types::VertexId;

const NIL: u32 = u32::MAX;

/// Eviction band requested when a vertex is touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    /// Refresh recency without moving the vertex to another band.
    Keep,
    /// Move the vertex to the given band.
    At(u32),
}

impl Section {
    /// Band of vertices with no locality information; evicted first.
    pub const FREE: Section = Section::At(0);
    /// Band of vertices that some worker still holds.
    pub const IN_USE: Section = Section::At(1);
    /// First band carrying real scan-order locality.
    pub const FIRST_LOCAL: u32 = 2;
}

/// Band and priority a caller asks for when releasing or writing a vertex.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectionHint {
    /// Requested band.
    pub section: Section,
    /// Scan-order priority, recorded for diagnostics.
    pub priority: f64,
}

impl SectionHint {
    /// Keep the current band.
    pub const KEEP: SectionHint = SectionHint {
        section: Section::Keep,
        priority: 0.0,
    };
    /// No locality; evict early.
    pub const FREE: SectionHint = SectionHint {
        section: Section::FREE,
        priority: 0.0,
    };

    /// Hint for band `section`.
    pub fn at(section: u32, priority: f64) -> Self {
        Self {
            section: Section::At(section),
            priority,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Node {
    prev: u32,
    next: u32,
    section: u32,
    priority: f64,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            prev: NIL,
            next: NIL,
            section: NIL,
            priority: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Band {
    head: u32,
    tail: u32,
    len: usize,
}

impl Default for Band {
    fn default() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }
}

/// Locality-aware LRU split into numbered bands ("sections").
///
/// Each band is an intrusive recency list over vertex ids, most recent at the
/// head. Band 0 is drained first; after that the highest populated band loses
/// its least recently used member. Section numbers follow scan order, so the
/// highest band holds the vertices the scan reaches last.
///
/// Every operation is O(1) except [`cleaning`](Self::cleaning), which is
/// linear in the members it moves.
#[derive(Debug)]
pub struct SectionedLru {
    nodes: Vec<Node>,
    bands: Vec<Band>,
    max_section: usize,
    len: usize,
}

impl SectionedLru {
    /// Creates a policy for `num_vertices` ids and `num_sections` bands.
    ///
    /// # Panics
    /// Panics if `num_sections < 2`; bands 0 and 1 are always needed.
    pub fn new(num_vertices: usize, num_sections: usize) -> Self {
        assert!(num_sections >= 2, "sectioned lru needs at least two sections");
        Self {
            nodes: vec![Node::default(); num_vertices],
            bands: vec![Band::default(); num_sections],
            max_section: 0,
            len: 0,
        }
    }

    /// Number of bands.
    pub fn num_sections(&self) -> usize {
        self.bands.len()
    }

    /// Number of tracked vertices.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no vertex is tracked.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of vertices in band `section`.
    pub fn section_len(&self, section: usize) -> usize {
        self.bands.get(section).map_or(0, |b| b.len)
    }

    /// Band currently holding `vertex`, if tracked.
    pub fn section_of(&self, vertex: VertexId) -> Option<u32> {
        match self.nodes[vertex as usize].section {
            NIL => None,
            s => Some(s),
        }
    }

    /// Priority recorded by the last [`access`](Self::access) of `vertex`.
    pub fn priority(&self, vertex: VertexId) -> Option<f64> {
        self.section_of(vertex)
            .map(|_| self.nodes[vertex as usize].priority)
    }

    /// Moves `vertex` to the head of band `section` and records `priority`.
    /// [`Section::Keep`] keeps the current band; an untracked vertex then
    /// lands in band 0. Bands past the last one are clamped.
    pub fn access(&mut self, vertex: VertexId, section: Section, priority: f64) {
        let current = self.nodes[vertex as usize].section;
        let target = match section {
            Section::Keep if current == NIL => 0,
            Section::Keep => current,
            Section::At(s) => s.min(self.bands.len() as u32 - 1),
        };
        if current != NIL {
            self.unlink(vertex);
        }
        self.push_front(vertex, target);
        self.nodes[vertex as usize].priority = priority;
        self.max_section = self.max_section.max(target as usize);
    }

    /// Pops the next eviction candidate: the least recently used member of
    /// band 0, otherwise of the highest populated band. Returns `None` when no
    /// vertex is tracked.
    pub fn victim(&mut self) -> Option<VertexId> {
        if self.bands[0].len > 0 {
            return self.pop_back(0);
        }
        while self.max_section > 0 && self.bands[self.max_section].len == 0 {
            self.max_section -= 1;
        }
        if self.max_section == 0 {
            return None;
        }
        self.pop_back(self.max_section as u32)
    }

    /// Stops tracking `vertex`. No-op if it is not tracked.
    pub fn remove(&mut self, vertex: VertexId) {
        if self.nodes[vertex as usize].section != NIL {
            self.unlink(vertex);
        }
    }

    /// Demotes every member of bands `[prev, current)` to band 0, keeping
    /// their relative recency, and returns the demoted ids oldest first.
    pub fn cleaning(&mut self, prev: u32, current: u32) -> Vec<VertexId> {
        let mut demoted = Vec::new();
        let end = current.min(self.bands.len() as u32);
        for section in prev.max(1)..end {
            while let Some(vertex) = self.pop_back(section) {
                self.push_front(vertex, 0);
                demoted.push(vertex);
            }
        }
        demoted
    }

    /// Forgets every tracked vertex.
    pub fn clear(&mut self) {
        self.nodes.fill(Node::default());
        self.bands.fill(Band::default());
        self.max_section = 0;
        self.len = 0;
    }

    fn push_front(&mut self, vertex: VertexId, section: u32) {
        let band = &mut self.bands[section as usize];
        let old_head = band.head;
        band.head = vertex;
        if old_head == NIL {
            band.tail = vertex;
        }
        band.len += 1;
        if old_head != NIL {
            self.nodes[old_head as usize].prev = vertex;
        }
        let node = &mut self.nodes[vertex as usize];
        node.prev = NIL;
        node.next = old_head;
        node.section = section;
        self.len += 1;
    }

    fn pop_back(&mut self, section: u32) -> Option<VertexId> {
        let tail = self.bands[section as usize].tail;
        if tail == NIL {
            return None;
        }
        self.unlink(tail);
        Some(tail)
    }

    fn unlink(&mut self, vertex: VertexId) {
        let Node {
            prev,
            next,
            section,
            ..
        } = self.nodes[vertex as usize];
        debug_assert_ne!(section, NIL);
        let band = &mut self.bands[section as usize];
        if prev == NIL {
            band.head = next;
        }
        if next == NIL {
            band.tail = prev;
        }
        band.len -= 1;
        if prev != NIL {
            self.nodes[prev as usize].next = next;
        }
        if next != NIL {
            self.nodes[next as usize].prev = prev;
        }
        let node = &mut self.nodes[vertex as usize];
        node.prev = NIL;
        node.next = NIL;
        node.section = NIL;
        self.len -= 1;
    }
}
