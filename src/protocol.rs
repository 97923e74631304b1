// src/protocol.rs

//! 线协议：一个命令就是一个二进制字符串数组
//!
//! ```text
//! *<N>\r\n
//! $<len>\r\n<len 字节>\r\n      （重复 N 次）
//! ```
//!
//! 元素按长度读取，所以可以包含任意字节，包括 `\r\n`。

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// 单个元素的长度上限
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// 一个数组最多多少个元素
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is truncated")]
    Truncated,
    #[error("expected '{expected}', found byte {found:#04x}")]
    UnexpectedByte { expected: char, found: u8 },
    #[error("invalid length '{0}'")]
    BadLength(String),
    #[error("element not terminated by CRLF")]
    MissingCrlf,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Frame = Vec<Vec<u8>>;

/// 把一组元素编码成数组帧
pub fn encode<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        let item = item.as_ref();
        out.extend_from_slice(format!("${}\r\n", item.len()).as_bytes());
        out.extend_from_slice(item);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// 从 `buf` 开头解出一个完整的帧，返回帧和消耗的字节数
pub fn decode(buf: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    let mut pos = 0;
    let count = header(buf, &mut pos, '*', MAX_ARRAY_LEN)?;
    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let len = header(buf, &mut pos, '$', MAX_BULK_LEN)?;
        let end = pos + len;
        if buf.len() < end + 2 {
            return Err(ProtocolError::Truncated);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::MissingCrlf);
        }
        items.push(buf[pos..end].to_vec());
        pos = end + 2;
    }
    Ok((items, pos))
}

/// 解析 `<marker><digits>\r\n`
fn header(buf: &[u8], pos: &mut usize, marker: char, max: usize) -> Result<usize, ProtocolError> {
    let rest = &buf[*pos..];
    let Some(&first) = rest.first() else {
        return Err(ProtocolError::Truncated);
    };
    if first != marker as u8 {
        return Err(ProtocolError::UnexpectedByte {
            expected: marker,
            found: first,
        });
    }
    let Some(lf) = rest.iter().position(|&b| b == b'\n') else {
        return Err(ProtocolError::Truncated);
    };
    let n = parse_len(&rest[1..lf], max)?;
    *pos += lf + 1;
    Ok(n)
}

/// `digits` 里可能带着结尾的 `\r`
fn parse_len(digits: &[u8], max: usize) -> Result<usize, ProtocolError> {
    let Some(digits) = digits.strip_suffix(b"\r") else {
        return Err(ProtocolError::MissingCrlf);
    };
    let text = String::from_utf8_lossy(digits);
    match text.parse::<usize>() {
        Ok(n) if n <= max => Ok(n),
        _ => Err(ProtocolError::BadLength(text.into_owned())),
    }
}

/// 从流里读一个帧。帧开始之前遇到 EOF 返回 `Ok(None)`；帧读到一半断开是 `Truncated`。
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    let count = line_header(&line, '*', MAX_ARRAY_LEN)?;

    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        line.clear();
        reader.read_until(b'\n', &mut line).await?;
        let len = line_header(&line, '$', MAX_BULK_LEN)?;
        let mut item = vec![0u8; len + 2];
        reader.read_exact(&mut item).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::Truncated,
            _ => ProtocolError::Io(e),
        })?;
        if !item.ends_with(b"\r\n") {
            return Err(ProtocolError::MissingCrlf);
        }
        item.truncate(len);
        items.push(item);
    }
    Ok(Some(items))
}

fn line_header(line: &[u8], marker: char, max: usize) -> Result<usize, ProtocolError> {
    let Some(body) = line.strip_suffix(b"\n") else {
        return Err(ProtocolError::Truncated);
    };
    match body.first() {
        Some(&b) if b == marker as u8 => parse_len(&body[1..], max),
        Some(&b) => Err(ProtocolError::UnexpectedByte {
            expected: marker,
            found: b,
        }),
        None => Err(ProtocolError::Truncated),
    }
}
