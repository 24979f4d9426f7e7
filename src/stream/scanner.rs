//! 增量标记扫描器
//!
//! 模型输出流中嵌入的工具调用标记形如 `<call name=search args={"origin":"SFO"}/>`。
//! consume(chunk) 接收任意切分的文本块，按出现顺序产出纯文本片段与完整的 ToolCallRecord；
//! 末尾尚未闭合的标记前缀留在缓冲区等待下一块，这是跨调用唯一保留的状态
//! （连同 args 深度扫描的进度，续扫时不必从 `<` 重新解析）。
//!
//! args 的边界用深度计数确定（识别 JSON 字符串与反斜杠转义），嵌套对象 / 数组不会在第一个 `}` 处截断。
//! 括号配平但不是合法 JSON 的调用整段丢弃（记 warn），前后文本原样保留。
//! 超过 max_marker_bytes 仍未闭合的前缀：整个上限窗口按普通文本输出，窗口内不再提取调用，保证内存有界。
//! flush 时未闭合的标记连同其后全部内容按文本输出，参数字符串里引用的标记不会被执行。

use serde::{Deserialize, Serialize};
use serde_json::Value;

const OPEN_TOKEN: &str = "<call";
const CLOSE_TOKEN: &str = "/>";
const NAME_KEY: &str = "name=";
const ARGS_KEY: &str = "args=";

/// 单个标记默认最大字节数
pub const DEFAULT_MAX_MARKER_BYTES: usize = 64 * 1024;

/// 从流中提取出的完整工具调用（产出后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
}

/// 扫描产物：按原始顺序排列的文本与调用
#[derive(Debug, Clone, PartialEq)]
pub enum ScanItem {
    Text(String),
    Call(ToolCallRecord),
}

/// 一次 consume / flush 的输出；相邻文本会合并
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutput {
    pub items: Vec<ScanItem>,
}

impl ScanOutput {
    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(ScanItem::Text(last)) = self.items.last_mut() {
            last.push_str(text);
        } else {
            self.items.push(ScanItem::Text(text.to_string()));
        }
    }

    fn push_call(&mut self, call: ToolCallRecord) {
        self.items.push(ScanItem::Call(call));
    }

    /// 追加另一段输出（首尾文本合并）
    pub fn extend(&mut self, other: ScanOutput) {
        for item in other.items {
            match item {
                ScanItem::Text(t) => self.push_text(&t),
                ScanItem::Call(c) => self.push_call(c),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 本次产出的全部文本
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|i| match i {
                ScanItem::Text(t) => Some(t.as_str()),
                ScanItem::Call(_) => None,
            })
            .collect()
    }

    /// 本次产出的完整调用
    pub fn calls(&self) -> Vec<&ToolCallRecord> {
        self.items
            .iter()
            .filter_map(|i| match i {
                ScanItem::Call(c) => Some(c),
                ScanItem::Text(_) => None,
            })
            .collect()
    }

    /// (text_delta, complete_calls) 视图
    pub fn into_parts(self) -> (String, Vec<ToolCallRecord>) {
        let mut text = String::new();
        let mut calls = Vec::new();
        for item in self.items {
            match item {
                ScanItem::Text(t) => text.push_str(&t),
                ScanItem::Call(c) => calls.push(c),
            }
        }
        (text, calls)
    }
}

/// 缓冲区状态：静止时至多持有一个未完成的标记前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Outside,
    InsideMarker,
}

/// 增量扫描器；每个会话独占一个实例
#[derive(Debug)]
pub struct MarkerScanner {
    buffer: String,
    state: ScanState,
    /// consume_bytes 时跨块残留的不完整 UTF-8 序列
    utf8_tail: Vec<u8>,
    max_marker_bytes: usize,
    dropped_calls: usize,
    /// 缓冲区开头那个标记的 args 扫描进度
    progress: Option<PayloadProgress>,
}

impl Default for MarkerScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self::with_max_marker_bytes(DEFAULT_MAX_MARKER_BYTES)
    }

    pub fn with_max_marker_bytes(max_marker_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            state: ScanState::Outside,
            utf8_tail: Vec::new(),
            max_marker_bytes: max_marker_bytes.max(OPEN_TOKEN.len()),
            dropped_calls: 0,
            progress: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// 当前缓冲的未完成前缀
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// 因 args 非法而丢弃的调用数
    pub fn dropped_calls(&self) -> usize {
        self.dropped_calls
    }

    /// 喂入一块文本；空块为 no-op
    pub fn consume(&mut self, chunk: &str) -> ScanOutput {
        if chunk.is_empty() {
            return ScanOutput::default();
        }
        self.buffer.push_str(chunk);
        self.drain(false)
    }

    /// 喂入原始字节；块尾不完整的 UTF-8 序列留到下一块，非法字节替换为 U+FFFD
    pub fn consume_bytes(&mut self, bytes: &[u8]) -> ScanOutput {
        if bytes.is_empty() {
            return ScanOutput::default();
        }
        let mut data = std::mem::take(&mut self.utf8_tail);
        data.extend_from_slice(bytes);

        let mut text = String::with_capacity(data.len());
        let mut rest = data.as_slice();
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    text.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(s) = std::str::from_utf8(valid) {
                        text.push_str(s);
                    }
                    match e.error_len() {
                        Some(n) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[n..];
                        }
                        None => {
                            self.utf8_tail = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        self.consume(&text)
    }

    /// 流结束：不再等待输入，未闭合的前缀按普通文本输出
    pub fn flush(&mut self) -> ScanOutput {
        if !self.utf8_tail.is_empty() {
            self.utf8_tail.clear();
            self.buffer.push(char::REPLACEMENT_CHARACTER);
        }
        self.drain(true)
    }

    fn drain(&mut self, at_end: bool) -> ScanOutput {
        let buf = std::mem::take(&mut self.buffer);
        let mut resume = self.progress.take();
        let mut out = ScanOutput::default();
        let mut pos = 0;

        while pos < buf.len() {
            let rest = &buf[pos..];
            let Some(offset) = rest.find('<') else {
                out.push_text(rest);
                break;
            };
            out.push_text(&rest[..offset]);
            let start = pos + offset;

            // 进度只对上次留在缓冲区开头的标记有效
            let hint = if start == 0 { resume.take() } else { None };
            match self.match_at(&buf[start..], hint) {
                MarkerMatch::Complete { len, call } => {
                    match call {
                        Some(call) => out.push_call(call),
                        None => self.dropped_calls += 1,
                    }
                    pos = start + len;
                }
                MarkerMatch::Incomplete(progress) if !at_end => {
                    self.buffer = buf[start..].to_string();
                    self.progress = progress;
                    self.state = ScanState::InsideMarker;
                    return out;
                }
                MarkerMatch::Incomplete(_) => {
                    out.push_text(&buf[start..]);
                    break;
                }
                MarkerMatch::Oversized { len } => {
                    out.push_text(&buf[start..start + len]);
                    pos = start + len;
                }
                MarkerMatch::NotMarker => {
                    out.push_text("<");
                    pos = start + 1;
                }
            }
        }

        self.state = ScanState::Outside;
        out
    }

    /// 在 `<` 处尝试匹配；超过上限的标记（无论是否闭合）一律视为文本，保证切块方式不影响结果
    fn match_at(&self, input: &str, resume: Option<PayloadProgress>) -> MarkerMatch {
        let mut end = input.len().min(self.max_marker_bytes + 1);
        while !input.is_char_boundary(end) {
            end -= 1;
        }
        let window = &input[..end];

        match match_marker(window, resume) {
            MarkerMatch::Complete { len, .. } if len > self.max_marker_bytes => {
                MarkerMatch::Oversized { len: end }
            }
            MarkerMatch::Incomplete(_) if input.len() > self.max_marker_bytes => {
                tracing::warn!(
                    limit = self.max_marker_bytes,
                    "tool call marker exceeds size limit, treating as text"
                );
                MarkerMatch::Oversized { len: end }
            }
            other => other,
        }
    }
}

#[derive(Debug)]
enum MarkerMatch {
    /// len：标记占用的字节数；call 为 None 表示 args 非法、整段丢弃
    Complete {
        len: usize,
        call: Option<ToolCallRecord>,
    },
    /// 可能是标记，但还需要更多输入；已进入 args 时附带扫描进度
    Incomplete(Option<PayloadProgress>),
    /// 超过上限：前 len 字节（上限窗口）整体作为文本
    Oversized { len: usize },
    NotMarker,
}

/// args 深度扫描的断点；缓冲区只会追加，断点之前的字节不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PayloadProgress {
    start: usize,
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    NeedMore,
    Mismatch,
}

/// input 以 `<` 开头
fn match_marker(input: &str, resume: Option<PayloadProgress>) -> MarkerMatch {
    let mut cur = Cursor {
        src: input,
        pos: 0,
        progress: resume,
    };
    match parse_marker(&mut cur) {
        Ok((len, name, payload)) => {
            let call = match serde_json::from_str::<Value>(payload) {
                Ok(arguments) => Some(ToolCallRecord {
                    name: name.to_string(),
                    arguments,
                }),
                Err(e) => {
                    tracing::warn!(tool = name, error = %e, "dropping tool call with malformed arguments");
                    None
                }
            };
            MarkerMatch::Complete { len, call }
        }
        Err(Halt::NeedMore) => MarkerMatch::Incomplete(cur.progress),
        Err(Halt::Mismatch) => MarkerMatch::NotMarker,
    }
}

fn parse_marker<'a>(cur: &mut Cursor<'a>) -> Result<(usize, &'a str, &'a str), Halt> {
    cur.literal(OPEN_TOKEN)?;
    cur.required_whitespace()?;
    cur.literal(NAME_KEY)?;
    let name = cur.name()?;
    cur.required_whitespace()?;
    cur.literal(ARGS_KEY)?;
    let payload = cur.payload()?;
    cur.whitespace();
    cur.literal(CLOSE_TOKEN)?;
    Ok((cur.pos, name, payload))
}

/// 语法记号均为 ASCII，UTF-8 多字节序列的任何字节都不会与之相等，按字节扫描即可
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    /// 传入时为续扫断点，payload 需要更多输入时写回新断点
    progress: Option<PayloadProgress>,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn literal(&mut self, lit: &str) -> Result<(), Halt> {
        let rest = &self.src.as_bytes()[self.pos..];
        let lit = lit.as_bytes();
        if rest.len() >= lit.len() {
            if rest.starts_with(lit) {
                self.pos += lit.len();
                Ok(())
            } else {
                Err(Halt::Mismatch)
            }
        } else if lit.starts_with(rest) {
            Err(Halt::NeedMore)
        } else {
            Err(Halt::Mismatch)
        }
    }

    fn whitespace(&mut self) -> usize {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        self.pos - start
    }

    fn required_whitespace(&mut self) -> Result<(), Halt> {
        let n = self.whitespace();
        if self.peek().is_none() {
            Err(Halt::NeedMore)
        } else if n == 0 {
            Err(Halt::Mismatch)
        } else {
            Ok(())
        }
    }

    /// 裸名 `[A-Za-z0-9_.-]+` 或双引号包裹
    fn name(&mut self) -> Result<&'a str, Halt> {
        match self.peek() {
            None => Err(Halt::NeedMore),
            Some(b'"') => {
                let start = self.pos + 1;
                let rest = &self.src[start..];
                match rest.find(['"', '<', '>', '\n']) {
                    None => Err(Halt::NeedMore),
                    Some(end) if end > 0 && rest.as_bytes()[end] == b'"' => {
                        self.pos = start + end + 1;
                        Ok(&rest[..end])
                    }
                    Some(_) => Err(Halt::Mismatch),
                }
            }
            Some(_) => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
                {
                    self.pos += 1;
                }
                if self.pos == start {
                    Err(Halt::Mismatch)
                } else if self.peek().is_none() {
                    Err(Halt::NeedMore)
                } else {
                    Ok(&self.src[start..self.pos])
                }
            }
        }
    }

    /// 深度计数：从 `{` / `[` 开始，直到回到深度 0；字符串内的括号与转义引号不计
    fn payload(&mut self) -> Result<&'a str, Halt> {
        let start = self.pos;
        let mut st = match self.progress.take() {
            Some(p) if p.start == start && p.pos <= self.src.len() => p,
            _ => {
                match self.peek() {
                    None => return Err(Halt::NeedMore),
                    Some(b'{' | b'[') => {}
                    Some(_) => return Err(Halt::Mismatch),
                }
                PayloadProgress {
                    start,
                    pos: start,
                    depth: 0,
                    in_string: false,
                    escaped: false,
                }
            }
        };

        self.pos = st.pos;
        while let Some(b) = self.peek() {
            self.pos += 1;
            if st.in_string {
                if st.escaped {
                    st.escaped = false;
                } else if b == b'\\' {
                    st.escaped = true;
                } else if b == b'"' {
                    st.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => st.in_string = true,
                b'{' | b'[' => st.depth += 1,
                b'}' | b']' => {
                    st.depth -= 1;
                    if st.depth == 0 {
                        return Ok(&self.src[start..self.pos]);
                    }
                }
                _ => {}
            }
        }
        st.pos = self.pos;
        self.progress = Some(st);
        Err(Halt::NeedMore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const SCENARIO: &str = r#"Checking flights. <call name=search args={"origin":"SFO","destination":"CDG"}/> Done."#;

    fn feed_all(scanner: &mut MarkerScanner, chunks: &[&str]) -> ScanOutput {
        let mut out = ScanOutput::default();
        for chunk in chunks {
            out.extend(scanner.consume(chunk));
        }
        out.extend(scanner.flush());
        out
    }

    fn scan_whole(input: &str) -> ScanOutput {
        feed_all(&mut MarkerScanner::new(), &[input])
    }

    fn scan_bytewise(input: &str) -> ScanOutput {
        let mut scanner = MarkerScanner::new();
        let mut out = ScanOutput::default();
        for b in input.as_bytes() {
            out.extend(scanner.consume_bytes(std::slice::from_ref(b)));
        }
        out.extend(scanner.flush());
        out
    }

    fn search_call() -> ToolCallRecord {
        ToolCallRecord {
            name: "search".into(),
            arguments: json!({"origin": "SFO", "destination": "CDG"}),
        }
    }

    #[test]
    fn test_plain_text_passes_through() {
        let mut scanner = MarkerScanner::new();
        let out = scanner.consume("hello world");
        assert_eq!(out.items, vec![ScanItem::Text("hello world".into())]);
        assert_eq!(scanner.state(), ScanState::Outside);
        assert!(scanner.flush().is_empty());
    }

    #[test]
    fn test_scenario_split_inside_args() {
        let split = SCENARIO.find("\"CDG\"").unwrap();
        let mut scanner = MarkerScanner::new();

        let first = scanner.consume(&SCENARIO[..split]);
        assert_eq!(first.items, vec![ScanItem::Text("Checking flights. ".into())]);
        assert_eq!(scanner.state(), ScanState::InsideMarker);

        let second = scanner.consume(&SCENARIO[split..]);
        assert_eq!(
            second.items,
            vec![
                ScanItem::Call(search_call()),
                ScanItem::Text(" Done.".into()),
            ]
        );
        assert_eq!(scanner.state(), ScanState::Outside);
        assert!(scanner.flush().is_empty());
    }

    #[test]
    fn test_parts_view() {
        let (text, calls) = scan_whole(SCENARIO).into_parts();
        assert_eq!(text, "Checking flights.  Done.");
        assert_eq!(calls, vec![search_call()]);
    }

    #[test]
    fn test_nested_payload_is_not_truncated() {
        let input = r#"x <call name=probe args={"outer":{"inner":"value"},"array":[1,2,3]}/> y"#;
        let out = scan_whole(input);
        assert_eq!(
            out.items,
            vec![
                ScanItem::Text("x ".into()),
                ScanItem::Call(ToolCallRecord {
                    name: "probe".into(),
                    arguments: json!({"outer": {"inner": "value"}, "array": [1, 2, 3]}),
                }),
                ScanItem::Text(" y".into()),
            ]
        );
    }

    #[test]
    fn test_braces_and_escaped_quotes_inside_strings() {
        let input = r#"<call name=note args={"text":"a } b { \"quoted}\" ]"}/>"#;
        let out = scan_whole(input);
        assert_eq!(
            out.items,
            vec![ScanItem::Call(ToolCallRecord {
                name: "note".into(),
                arguments: json!({"text": "a } b { \"quoted}\" ]"}),
            })]
        );
    }

    #[test]
    fn test_malformed_payload_dropped_text_preserved() {
        let mut scanner = MarkerScanner::new();
        let mut out = scanner.consume(r#"Before <call name=search args={"origin": SFO}/> After"#);
        out.extend(scanner.flush());
        assert_eq!(out.items, vec![ScanItem::Text("Before  After".into())]);
        assert_eq!(scanner.dropped_calls(), 1);
    }

    #[test]
    fn test_partial_open_prefix_is_retained() {
        let mut scanner = MarkerScanner::new();
        let out = scanner.consume("Hello <ca");
        assert_eq!(out.text(), "Hello ");
        assert_eq!(scanner.pending(), "<ca");
        assert_eq!(scanner.state(), ScanState::InsideMarker);

        let out = scanner.consume("t naps");
        assert_eq!(out.text(), "<cat naps");
        assert_eq!(scanner.pending(), "");
    }

    #[test]
    fn test_non_marker_angle_brackets_are_text() {
        let out = scan_whole("a < b, <callback>, <call>, <call name=x args=7/>");
        assert!(out.calls().is_empty());
        assert_eq!(out.text(), "a < b, <callback>, <call>, <call name=x args=7/>");
    }

    #[test]
    fn test_flush_emits_dangling_marker_as_text() {
        let mut scanner = MarkerScanner::new();
        let out = scanner.consume(r#"tail <call name=search args={"origin":"SF"#);
        assert_eq!(out.text(), "tail ");
        let rest = scanner.flush();
        assert_eq!(rest.text(), r#"<call name=search args={"origin":"SF"#);
        assert_eq!(scanner.state(), ScanState::Outside);
    }

    #[test]
    fn test_dangling_marker_never_runs_quoted_calls() {
        let input = r#"note <call name=a args={"q":"<call name=delete_all args={}/>"  trailing"#;
        let out = scan_whole(input);
        assert!(out.calls().is_empty(), "{:?}", out.items);
        assert_eq!(out.items, vec![ScanItem::Text(input.into())]);
        assert_eq!(scan_bytewise(input), out);
    }

    #[test]
    fn test_oversized_window_is_skipped_as_text() {
        let input = concat!(
            r#"<call name=a args={"q":"<call name=delete_all args={}/>","#,
            r#""pad":"xxxxxxxxxxxxxxxxxxxx"}/> after"#
        );
        let whole = feed_all(&mut MarkerScanner::with_max_marker_bytes(64), &[input]);
        assert!(whole.calls().is_empty(), "{:?}", whole.items);
        assert_eq!(whole.text(), input);

        let mut scanner = MarkerScanner::with_max_marker_bytes(64);
        let mut out = ScanOutput::default();
        for b in input.as_bytes() {
            out.extend(scanner.consume_bytes(std::slice::from_ref(b)));
        }
        out.extend(scanner.flush());
        assert_eq!(out, whole);
    }

    #[test]
    fn test_payload_scan_resumes_across_chunks() {
        let mut scanner = MarkerScanner::new();
        assert!(scanner.consume(r#"<call name=echo args={"text":""#).is_empty());
        let first = scanner.progress.expect("payload progress recorded");
        assert!(first.in_string);

        assert!(scanner.consume(r#"a}b", "n": [1, {"#).is_empty());
        let second = scanner.progress.expect("payload progress recorded");
        assert_eq!(second.start, first.start);
        assert!(second.pos > first.pos);
        assert_eq!(second.depth, 3);
        assert!(!second.in_string);

        let out = scanner.consume(r#"}]}/> done"#);
        assert_eq!(
            out.items,
            vec![
                ScanItem::Call(ToolCallRecord {
                    name: "echo".into(),
                    arguments: json!({"text": "a}b", "n": [1, {}]}),
                }),
                ScanItem::Text(" done".into()),
            ]
        );
        assert!(scanner.progress.is_none());
    }

    #[test]
    fn test_quoted_name_and_array_payload() {
        let out = scan_whole(r#"<call name="calendar.query" args=[1, {"a":[2]}] />"#);
        assert_eq!(
            out.calls(),
            vec![&ToolCallRecord {
                name: "calendar.query".into(),
                arguments: json!([1, {"a": [2]}]),
            }]
        );
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut scanner = MarkerScanner::new();
        scanner.consume("abc <cal");
        assert!(scanner.consume("").is_empty());
        assert!(scanner.consume_bytes(&[]).is_empty());
        assert_eq!(scanner.pending(), "<cal");
    }

    #[test]
    fn test_oversized_marker_degrades_to_text() {
        let mut scanner = MarkerScanner::with_max_marker_bytes(32);
        let input = r#"<call name=search args={"origin":"SFO","destination":"CDG"}/>"#;
        let out = feed_all(&mut scanner, &[input]);
        assert!(out.calls().is_empty());
        assert_eq!(out.text(), input);
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let input = "Café ✈ <call name=echo args={\"text\":\"東京\"}/> ok";
        let out = scan_bytewise(input);
        assert_eq!(out, scan_whole(input));
        assert_eq!(out.text(), "Café ✈  ok");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut scanner = MarkerScanner::new();
        let mut out = scanner.consume_bytes(b"ab\xffcd\xe2\x9c");
        out.extend(scanner.flush());
        assert_eq!(out.text(), "ab\u{FFFD}cd\u{FFFD}");
    }

    #[test]
    fn test_bytewise_matches_whole_for_scenarios() {
        let inputs = [
            SCENARIO,
            r#"<call name=a args={}/><call name=b args=[]/>"#,
            r#"one <call name=search args={"origin": SFO}/> two <call name=x args={"k":"<call"}/>"#,
            "<<<call <call name=y args={\"v\":\"\\\\\"}/>",
            "no markers at all <",
        ];
        for input in inputs {
            assert_eq!(scan_bytewise(input), scan_whole(input), "input: {input}");
        }
    }

    fn marker_fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z .,!<>/{}\"]{0,12}",
            Just(r#"<call name=search args={"origin":"SFO","nested":{"a":[1,{"b":"}"}]}}/>"#.to_string()),
            Just(r#"<call name=bad args={"x": nope}/>"#.to_string()),
            Just("<call name=".to_string()),
            Just(r#"<call name=a args={"q":"<call name=b args={}/>"#.to_string()),
            Just("é✈".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_chunk_boundaries_do_not_change_output(
            parts in proptest::collection::vec(marker_fragment(), 0..6),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let input: String = parts.concat();
            let bytes = input.as_bytes();
            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            offsets.sort_unstable();

            let mut scanner = MarkerScanner::new();
            let mut out = ScanOutput::default();
            let mut last = 0;
            for off in offsets.into_iter().chain(std::iter::once(bytes.len())) {
                out.extend(scanner.consume_bytes(&bytes[last..off]));
                last = off;
            }
            out.extend(scanner.flush());

            prop_assert_eq!(out, scan_whole(&input));
        }
    }
}
