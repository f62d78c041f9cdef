//! Descriptor parser for text-type surfaces.
//!
//! Text-type widgets are not rendered by the provider. Instead the provider
//! writes a small descriptor file and the viewer replays it against the
//! [`ScriptOperators`] table each subscriber registered.
//!
//! # Format
//!
//! ```text
//! {
//! type=text
//! part=title
//! data=Hello
//! id=1
//! }
//! ```
//!
//! A record is `{`, whitespace separated `field=value` pairs, and `}`. A
//! value runs to the end of its line. A `}` right before the end of a line
//! also closes the record, unless it pairs with an unmatched `{` earlier in
//! the value: `data=a{b}` keeps `a{b}` open, `data=a{b}}` stores `a{b}` and
//! closes. Known fields are `type`, `part`, `data`, `option`, `id`,
//! `target` and `file`.
//!
//! Structural problems (stray text, unknown field or type, missing `type`,
//! unterminated record) reject the whole file before any operator runs.
//! Semantic problems inside a well-formed record (an `info/size` value that
//! is not `WxH`, a `drag` value that is not `dXxdY`) only skip that record.

use std::path::Path;

use thiserror::Error;

use crate::error::ViewerError;
use crate::instance::WidgetHandle;

/// Callbacks invoked while a descriptor is replayed.
///
/// Every method has an empty default so implementors only override the
/// content kinds they render. `id` is the optional object id of the record.
pub trait ScriptOperators {
    /// A descriptor replay starts.
    fn update_begin(&mut self, _handle: WidgetHandle) {}

    /// A descriptor replay finished.
    fn update_end(&mut self, _handle: WidgetHandle) {}

    /// Set the text of `part`.
    fn update_text(&mut self, _handle: WidgetHandle, _id: Option<&str>, _part: &str, _text: &str) {}

    /// Set the image file shown in `part`.
    fn update_image(
        &mut self,
        _handle: WidgetHandle,
        _id: Option<&str>,
        _part: &str,
        _path: &str,
        _option: Option<&str>,
    ) {
    }

    /// Load a script (layout) file into `part`.
    fn update_script(
        &mut self,
        _handle: WidgetHandle,
        _id: Option<&str>,
        _target: Option<&str>,
        _part: &str,
        _file: &str,
        _option: Option<&str>,
    ) {
    }

    /// Emit a layout signal.
    fn update_signal(&mut self, _handle: WidgetHandle, _id: Option<&str>, _emission: &str, _source: &str) {}

    /// Move a draggable part.
    fn update_drag(&mut self, _handle: WidgetHandle, _id: Option<&str>, _part: &str, _dx: f64, _dy: f64) {}

    /// The content wants a different size.
    fn update_info_size(&mut self, _handle: WidgetHandle, _id: Option<&str>, _width: u32, _height: u32) {}

    /// The content changed its category.
    fn update_info_category(&mut self, _handle: WidgetHandle, _id: Option<&str>, _category: &str) {}

    /// Set the accessibility text of `part`.
    fn update_access(
        &mut self,
        _handle: WidgetHandle,
        _id: Option<&str>,
        _part: &str,
        _text: &str,
        _option: Option<&str>,
    ) {
    }

    /// Perform an accessibility operation on `part`.
    fn operate_access(
        &mut self,
        _handle: WidgetHandle,
        _id: Option<&str>,
        _part: &str,
        _operation: &str,
        _option: Option<&str>,
    ) {
    }

    /// Set the color of `part`.
    fn update_color(&mut self, _handle: WidgetHandle, _id: Option<&str>, _part: &str, _color: &str) {}
}

/// Record type, the closed set of content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// `access`
    Access,
    /// `access,operation`
    AccessOperation,
    /// `color`
    Color,
    /// `drag`
    Drag,
    /// `image`
    Image,
    /// `info`
    Info,
    /// `script`
    Script,
    /// `signal`
    Signal,
    /// `text`
    Text,
}

impl RecordType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "access" => Self::Access,
            "access,operation" => Self::AccessOperation,
            "color" => Self::Color,
            "drag" => Self::Drag,
            "image" => Self::Image,
            "info" => Self::Info,
            "script" => Self::Script,
            "signal" => Self::Signal,
            "text" => Self::Text,
            _ => return None,
        })
    }
}

/// One parsed record. Values borrow from the loaded descriptor text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    /// Content kind.
    pub kind: RecordType,
    /// `part=`
    pub part: Option<&'a str>,
    /// `data=`
    pub data: Option<&'a str>,
    /// `option=`
    pub option: Option<&'a str>,
    /// `id=`
    pub id: Option<&'a str>,
    /// `target=`
    pub target: Option<&'a str>,
    /// `file=`
    pub file: Option<&'a str>,
}

/// Structural parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("descriptor line {line}: {reason}")]
pub struct ParseError {
    /// 1-based line of the offending input.
    pub line: usize,
    /// What went wrong.
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    Field,
    Data(Field),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Type,
    Part,
    Data,
    Option,
    Id,
    Target,
    File,
}

impl Field {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "type" => Self::Type,
            "part" => Self::Part,
            "data" => Self::Data,
            "option" => Self::Option,
            "id" => Self::Id,
            "target" => Self::Target,
            "file" => Self::File,
            _ => return None,
        })
    }
}

#[derive(Debug, Default)]
struct Builder<'a> {
    kind: Option<&'a str>,
    part: Option<&'a str>,
    data: Option<&'a str>,
    option: Option<&'a str>,
    id: Option<&'a str>,
    target: Option<&'a str>,
    file: Option<&'a str>,
}

impl<'a> Builder<'a> {
    fn set(&mut self, field: Field, value: &'a str) {
        let slot = match field {
            Field::Type => &mut self.kind,
            Field::Part => &mut self.part,
            Field::Data => &mut self.data,
            Field::Option => &mut self.option,
            Field::Id => &mut self.id,
            Field::Target => &mut self.target,
            Field::File => &mut self.file,
        };
        *slot = Some(value);
    }

    fn finish(self, line: usize) -> Result<Record<'a>, ParseError> {
        let kind = self.kind.ok_or(ParseError { line, reason: "record without type" })?;
        let kind = RecordType::parse(kind).ok_or(ParseError { line, reason: "unknown record type" })?;
        Ok(Record {
            kind,
            part: self.part,
            data: self.data,
            option: self.option,
            id: self.id,
            target: self.target,
            file: self.file,
        })
    }
}

/// Parse a descriptor into records, in file order.
///
/// # Errors
///
/// Any structural error aborts the whole parse.
pub fn parse(text: &str) -> Result<Vec<Record<'_>>, ParseError> {
    let bytes = text.as_bytes();
    let mut records = Vec::new();
    let mut state = State::Begin;
    let mut builder = Builder::default();
    let mut line = 1;
    let mut i = 0;

    while i < bytes.len() || state == State::Done {
        match state {
            State::Begin => {
                let b = bytes[i];
                if b == b'{' {
                    builder = Builder::default();
                    state = State::Field;
                } else if !b.is_ascii_whitespace() {
                    return Err(ParseError { line, reason: "text outside of a record" });
                }
                if b == b'\n' {
                    line += 1;
                }
                i += 1;
            }
            State::Field => {
                let b = bytes[i];
                if b.is_ascii_whitespace() {
                    if b == b'\n' {
                        line += 1;
                    }
                    i += 1;
                    continue;
                }
                if b == b'}' {
                    i += 1;
                    state = State::Done;
                    continue;
                }
                let start = i;
                while i < bytes.len() && !matches!(bytes[i], b'=' | b'}') && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i >= bytes.len() || bytes[i] != b'=' {
                    return Err(ParseError { line, reason: "field without '='" });
                }
                let field = Field::parse(&text[start..i]).ok_or(ParseError { line, reason: "unknown field" })?;
                i += 1;
                state = State::Data(field);
            }
            State::Data(field) => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                let mut value = text[start..i].trim_end_matches('\r');
                let closes = value.strip_suffix('}').is_some_and(|body| {
                    body.matches('{').count() <= body.matches('}').count()
                });
                if closes {
                    value = &value[..value.len() - 1];
                }
                builder.set(field, value);
                state = if closes { State::Done } else { State::Field };
            }
            State::Done => {
                let finished = std::mem::take(&mut builder);
                records.push(finished.finish(line)?);
                state = State::Begin;
            }
        }
    }

    match state {
        State::Begin => Ok(records),
        _ => Err(ParseError { line, reason: "unterminated record" }),
    }
}

type Dispatch = fn(&Record<'_>, WidgetHandle, &mut dyn ScriptOperators);

fn dispatch_table(kind: RecordType) -> Dispatch {
    match kind {
        RecordType::Text => |r, h, ops| ops.update_text(h, r.id, part(r), data(r)),
        RecordType::Image => |r, h, ops| ops.update_image(h, r.id, part(r), data(r), r.option),
        RecordType::Script => |r, h, ops| {
            let file = r.file.or(r.data).unwrap_or("");
            ops.update_script(h, r.id, r.target, part(r), file, r.option);
        },
        RecordType::Signal => |r, h, ops| ops.update_signal(h, r.id, data(r), part(r)),
        RecordType::Drag => |r, h, ops| match parse_pair::<f64>(data(r)) {
            Some((dx, dy)) => ops.update_drag(h, r.id, part(r), dx, dy),
            None => log::warn!("[Desc] Skipping drag with invalid value '{}'", data(r)),
        },
        RecordType::Info => dispatch_info,
        RecordType::Access => |r, h, ops| ops.update_access(h, r.id, part(r), data(r), r.option),
        RecordType::AccessOperation => |r, h, ops| ops.operate_access(h, r.id, part(r), data(r), r.option),
        RecordType::Color => |r, h, ops| ops.update_color(h, r.id, part(r), data(r)),
    }
}

fn dispatch_info(r: &Record<'_>, h: WidgetHandle, ops: &mut dyn ScriptOperators) {
    match part(r) {
        "size" => match parse_pair::<u32>(data(r)) {
            Some((w, hgt)) => ops.update_info_size(h, r.id, w, hgt),
            None => log::warn!("[Desc] Skipping info/size with invalid value '{}'", data(r)),
        },
        "category" => ops.update_info_category(h, r.id, data(r)),
        other => log::debug!("[Desc] Ignoring info part '{}'", other),
    }
}

fn part<'a>(r: &Record<'a>) -> &'a str {
    r.part.unwrap_or("")
}

fn data<'a>(r: &Record<'a>) -> &'a str {
    r.data.unwrap_or("")
}

fn parse_pair<T: std::str::FromStr>(value: &str) -> Option<(T, T)> {
    let (a, b) = value.split_once('x')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Replay parsed records against every subscriber.
///
/// Calls `update_begin` on all subscribers, then each record in order on
/// each subscriber, then `update_end` on all subscribers.
pub fn apply(records: &[Record<'_>], subscribers: &mut [(WidgetHandle, &mut dyn ScriptOperators)]) {
    for (handle, ops) in subscribers.iter_mut() {
        ops.update_begin(*handle);
    }

    for record in records {
        let dispatch = dispatch_table(record.kind);
        for (handle, ops) in subscribers.iter_mut() {
            dispatch(record, *handle, &mut **ops);
        }
    }

    for (handle, ops) in subscribers.iter_mut() {
        ops.update_end(*handle);
    }
}

/// Load a descriptor file and replay it.
///
/// Returns the number of records applied.
///
/// # Errors
///
/// [`ViewerError::IoError`] if the file cannot be read,
/// [`ViewerError::InvalidParameter`] if it is structurally malformed. No
/// operator is called in either case.
pub fn load_and_apply(
    path: &Path,
    subscribers: &mut [(WidgetHandle, &mut dyn ScriptOperators)],
) -> Result<usize, ViewerError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        log::warn!("[Desc] Failed to load {}: {}", path.display(), e);
        ViewerError::IoError
    })?;
    let records = parse(&text).map_err(|e| {
        log::warn!("[Desc] {}: {}", path.display(), e);
        ViewerError::InvalidParameter
    })?;
    apply(&records, subscribers);
    Ok(records.len())
}
