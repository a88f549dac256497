use super::CodecError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormPart<'a> {
    pub(crate) name: String,
    pub(crate) data: &'a [u8],
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Value of a `key=value` parameter in a `;`-separated header value.
fn header_param<'h>(header: &'h str, key: &str) -> Option<&'h str> {
    header.split(';').skip(1).find_map(|item| {
        let (k, v) = item.split_once('=')?;
        k.trim().eq_ignore_ascii_case(key).then(|| unquote(v))
    })
}

pub(crate) fn boundary(content_type: &str) -> Result<String, CodecError> {
    header_param(content_type, "boundary")
        .filter(|b| !b.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| CodecError::InvalidMultipart("boundary is missing".to_string()))
}

fn skip_line_break(body: &[u8], cursor: usize) -> usize {
    if body.get(cursor..cursor + 2) == Some(b"\r\n") {
        cursor + 2
    } else if body.get(cursor..cursor + 1) == Some(b"\n") {
        cursor + 1
    } else {
        cursor
    }
}

fn parse_part_headers(raw: &str) -> Result<String, CodecError> {
    let disposition = raw
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-disposition"))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| CodecError::InvalidMultipart("part has no content-disposition".into()))?;

    header_param(disposition, "name")
        .map(str::to_string)
        .ok_or_else(|| CodecError::InvalidMultipart("part has no name".into()))
}

pub(crate) fn parse<'a>(content_type: &str, body: &'a [u8]) -> Result<Vec<FormPart<'a>>, CodecError> {
    let boundary = boundary(content_type)?;
    let opening = format!("--{boundary}");
    let delimiter = format!("\r\n--{boundary}");

    let mut cursor = find(body, opening.as_bytes(), 0)
        .ok_or_else(|| CodecError::InvalidMultipart("body has no boundary marker".into()))?
        + opening.len();

    let mut parts = Vec::new();
    while body.get(cursor..cursor + 2) != Some(b"--") {
        cursor = skip_line_break(body, cursor);

        let (headers_end, data_start) = match find(body, b"\r\n\r\n", cursor) {
            Some(idx) => (idx, idx + 4),
            None => {
                let idx = find(body, b"\n\n", cursor).ok_or_else(|| {
                    CodecError::InvalidMultipart("part has no header separator".into())
                })?;
                (idx, idx + 2)
            }
        };
        let name = parse_part_headers(&String::from_utf8_lossy(&body[cursor..headers_end]))?;

        let data_end = find(body, delimiter.as_bytes(), data_start).ok_or_else(|| {
            CodecError::InvalidMultipart("part has no closing boundary".into())
        })?;
        parts.push(FormPart {
            name,
            data: &body[data_start..data_end],
        });
        cursor = data_end + delimiter.len();
        if cursor >= body.len() {
            break;
        }
    }
    Ok(parts)
}
