//! Length-prefixed binary framing for file and audio transfers.
//!
//! Wire format, identical for upload and download:
//! `[2-byte BE name length][UTF-8 name][8-byte BE file length][raw bytes]`
//!
//! No delimiter follows the payload. The declared length is authoritative and
//! both sides stop exactly after that many bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Chunk size used when moving frame payloads: 8 KiB.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Name and declared length that precede a frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub file_name: String,
    pub length: u64,
}

impl FrameHeader {
    pub fn new(file_name: impl Into<String>, length: u64) -> Self {
        Self {
            file_name: file_name.into(),
            length,
        }
    }

    /// Encode the header: `[2-byte name_len][name][8-byte length]`
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let name = self.file_name.as_bytes();
        if name.is_empty() {
            return Err(ProtocolError::InvalidFrame("empty file name".into()));
        }
        let name_len = u16::try_from(name.len()).map_err(|_| {
            ProtocolError::InvalidFrame(format!("file name too long: {} bytes", name.len()))
        })?;

        let mut header = Vec::with_capacity(2 + name.len() + 8);
        header.extend_from_slice(&name_len.to_be_bytes());
        header.extend_from_slice(name);
        header.extend_from_slice(&self.length.to_be_bytes());
        Ok(header)
    }
}

/// Write a frame header and flush it.
pub async fn write_header<W>(writer: &mut W, header: &FrameHeader) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()?).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame header.
pub async fn read_header<R>(reader: &mut R) -> Result<FrameHeader, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let name_len = reader.read_u16().await? as usize;
    if name_len == 0 {
        return Err(ProtocolError::InvalidFrame("empty file name".into()));
    }
    let mut name = vec![0u8; name_len];
    reader.read_exact(&mut name).await?;
    let file_name = String::from_utf8(name)
        .map_err(|_| ProtocolError::InvalidFrame("file name is not UTF-8".into()))?;
    let length = reader.read_u64().await?;
    Ok(FrameHeader { file_name, length })
}

/// Move exactly `length` payload bytes from `reader` to `writer`.
///
/// Bytes are moved in [`CHUNK_SIZE`] chunks with a flush after each chunk.
/// Nothing beyond `length` is consumed from `reader`. A failure on the
/// writing side is reported as [`ProtocolError::Sink`] with the number of
/// bytes already consumed, so the caller can drain the rest of the frame.
pub async fn copy_payload<R, W>(
    reader: &mut R,
    writer: &mut W,
    length: u64,
) -> Result<u64, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut moved: u64 = 0;

    while moved < length {
        let want = (length - moved).min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                received: moved,
                expected: length,
            });
        }
        moved += n as u64;
        let written = match writer.write_all(&buf[..n]).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            return Err(ProtocolError::Sink {
                consumed: moved,
                source,
            });
        }
    }

    Ok(moved)
}

/// Consume and discard the remaining `length` payload bytes.
pub async fn drain_payload<R>(reader: &mut R, length: u64) -> Result<u64, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    copy_payload(reader, &mut tokio::io::sink(), length).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        // テスト項目: ヘッダが「名前長 2 バイト + 名前 + 長さ 8 バイト」で符号化される
        // given (前提条件):
        let header = FrameHeader::new("a.txt", 1024);

        // when (操作):
        let bytes = header.encode().unwrap();

        // then (期待する結果):
        assert_eq!(&bytes[..2], &5u16.to_be_bytes());
        assert_eq!(&bytes[2..7], b"a.txt");
        assert_eq!(&bytes[7..], &1024u64.to_be_bytes());
    }

    #[test]
    fn test_header_rejects_empty_name() {
        // テスト項目: 空のファイル名は符号化できない
        // given (前提条件):
        let header = FrameHeader::new("", 1);

        // when (操作):
        let result = header.encode();

        // then (期待する結果):
        assert!(matches!(result, Err(ProtocolError::InvalidFrame(_))));
    }

    #[tokio::test]
    async fn test_payload_stops_at_declared_length() {
        // テスト項目: 宣言された長さちょうどで読み取りを止め、後続のバイトを消費しない
        // given (前提条件):
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut wire = FrameHeader::new("data.bin", payload.len() as u64)
            .encode()
            .unwrap();
        wire.extend_from_slice(&payload);
        wire.extend_from_slice(b"next line\r\n");
        let mut reader = &wire[..];

        // when (操作):
        let header = read_header(&mut reader).await.unwrap();
        let mut received = Vec::new();
        let moved = copy_payload(&mut reader, &mut received, header.length)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(header.file_name, "data.bin");
        assert_eq!(moved, payload.len() as u64);
        assert_eq!(received, payload);
        assert_eq!(reader, b"next line\r\n");
    }

    #[tokio::test]
    async fn test_payload_truncated_stream() {
        // テスト項目: 宣言より短いストリームは Truncated エラーになる
        // given (前提条件):
        let short: &[u8] = &[1, 2, 3];
        let mut reader = short;
        let mut sink = Vec::new();

        // when (操作):
        let result = copy_payload(&mut reader, &mut sink, 10).await;

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                received: 3,
                expected: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_sink_failure_reports_consumed_bytes() {
        // テスト項目: 書き込み側の失敗は Sink エラーとなり、消費済みバイト数が分かる
        // given (前提条件):
        let payload = vec![7u8; 100];
        let mut reader = &payload[..];
        let mut full: [u8; 10] = [0; 10];
        let mut writer = std::io::Cursor::new(&mut full[..]); // 10 バイトで満杯になる

        // when (操作):
        let result = copy_payload(&mut reader, &mut writer, 100).await;

        // then (期待する結果):
        match result {
            Err(ProtocolError::Sink { consumed, .. }) => {
                assert_eq!(consumed, 100);
                assert!(reader.is_empty());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_length_payload() {
        // テスト項目: 長さ 0 のファイルは何も読まずに完了する
        // given (前提条件):
        let mut reader: &[u8] = b"untouched";
        let mut sink = Vec::new();

        // when (操作):
        let moved = copy_payload(&mut reader, &mut sink, 0).await.unwrap();

        // then (期待する結果):
        assert_eq!(moved, 0);
        assert!(sink.is_empty());
        assert_eq!(reader, b"untouched");
    }
}
