use crate::codec::{CodecError, DecodeFailure};

/// Literal token that opens every text frame
pub const TEXT_MARKER: &str = "textMessage";

/// Separates marker, sender and body
pub const DELIMITER: char = ';';

const ESCAPE: char = '\\';

/// `marker;sender;body` with `\` escaping `;` and itself inside both fields
pub(crate) fn encode_escaped(sender: &str, body: &str) -> String {
    let mut out = String::with_capacity(TEXT_MARKER.len() + sender.len() + body.len() + 4);
    out.push_str(TEXT_MARKER);
    out.push(DELIMITER);
    push_escaped(&mut out, sender);
    out.push(DELIMITER);
    push_escaped(&mut out, body);
    out
}

fn push_escaped(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == DELIMITER || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Split on the first two unescaped delimiters and unescape both fields.
///
/// The body is everything after the second delimiter, so a bare `;` in a
/// body written by an older sender survives instead of truncating it.
pub(crate) fn decode_escaped(text: &str) -> Result<(String, String), DecodeFailure> {
    let rest = text
        .strip_prefix(TEXT_MARKER)
        .and_then(|rest| rest.strip_prefix(DELIMITER))
        .ok_or(DecodeFailure::MissingMarker)?;

    let mut sender = String::new();
    let mut chars = rest.char_indices().peekable();
    let mut body_start = None;

    while let Some((i, c)) = chars.next() {
        match c {
            ESCAPE => match chars.next_if(|&(_, next)| is_escapable(next)) {
                Some((_, escaped)) => sender.push(escaped),
                None => sender.push(ESCAPE),
            },
            DELIMITER => {
                body_start = Some(i + c.len_utf8());
                break;
            }
            _ => sender.push(c),
        }
    }

    let body_start = body_start.ok_or(DecodeFailure::MissingField("body"))?;
    Ok((sender, unescape(&rest[body_start..])))
}

/// Only `\;` and `\\` are escapes; any other backslash is kept as written
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.next_if(|&next| c == ESCAPE && is_escapable(next)) {
            Some(escaped) => out.push(escaped),
            None => out.push(c),
        }
    }
    out
}

fn is_escapable(c: char) -> bool {
    c == DELIMITER || c == ESCAPE
}

/// Plain `marker;sender;body` join; fields containing `;` are refused
pub(crate) fn encode_legacy(sender: &str, body: &str) -> Result<String, CodecError> {
    if sender.contains(DELIMITER) {
        return Err(CodecError::DelimiterInField { field: "sender" });
    }
    if body.contains(DELIMITER) {
        return Err(CodecError::DelimiterInField { field: "body" });
    }
    Ok(format!("{TEXT_MARKER}{DELIMITER}{sender}{DELIMITER}{body}"))
}

/// Split on every delimiter and drop empty pieces; the first piece must begin
/// with the marker, the sender is the next piece and the body the last one.
pub(crate) fn decode_legacy(text: &str) -> Result<(String, String), DecodeFailure> {
    let mut pieces = text.split(DELIMITER).filter(|piece| !piece.is_empty());

    match pieces.next() {
        Some(first) if first.starts_with(TEXT_MARKER) => {}
        _ => return Err(DecodeFailure::MissingMarker),
    }

    let sender = pieces.next().ok_or(DecodeFailure::MissingField("sender"))?;
    let body = pieces.last().unwrap_or(sender);
    Ok((sender.to_string(), body.to_string()))
}
