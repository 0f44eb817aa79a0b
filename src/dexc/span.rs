//! Source locations carried on AST nodes and diagnostics.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u32);
impl SpanId {
    pub const NONE: SpanId = SpanId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub file_id: u32,
    pub start: u32,
    pub len: u32,
}

impl Span {
    pub const NONE: Span = Span { file_id: 0, start: 0, len: 0 };

    pub fn end(&self) -> u32 {
        self.start + self.len
    }
}

#[derive(Debug, Clone)]
pub struct Spans {
    spans: Vec<Span>,
}

impl Spans {
    pub fn new() -> Spans {
        Spans { spans: vec![Span::NONE] }
    }

    pub fn add(&mut self, span: Span) -> SpanId {
        let id = self.spans.len();
        self.spans.push(span);
        SpanId(id as u32)
    }

    pub fn get(&self, id: SpanId) -> Span {
        self.spans[id.0 as usize]
    }
}

impl Default for Spans {
    fn default() -> Self {
        Spans::new()
    }
}
