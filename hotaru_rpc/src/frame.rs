//! Bit-exact wire framing: correlation header + type envelope + payload.
//!
//! Layout (all integers little-endian, see the protocol's §6.1):
//!
//! ```text
//! MessageId: i32 | InResponseToId: i32 | TypeCode: u8
//! -- TypeCode in {Empty, DBNull} ends the frame here --
//! CodePage: i32
//! -- only if TypeCode == Object --
//! TypeNameLength: i32 | TypeName: [u8; TypeNameLength]
//! ContentLength: i32 | Content: [u8; ContentLength]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codepage::CodePage;
use crate::error::{NetworkError, Result};

/// Discriminates the payload carried by a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    Empty = 0,
    Object = 1,
    DBNull = 2,
    Boolean = 3,
    Char = 4,
    SByte = 5,
    Byte = 6,
    Int16 = 7,
    UInt16 = 8,
    Int32 = 9,
    UInt32 = 10,
    Int64 = 11,
    UInt64 = 12,
    Single = 13,
    Double = 14,
    Decimal = 15,
    DateTime = 16,
    String = 18,
}

impl TypeCode {
    fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::Empty,
            1 => Self::Object,
            2 => Self::DBNull,
            3 => Self::Boolean,
            4 => Self::Char,
            5 => Self::SByte,
            6 => Self::Byte,
            7 => Self::Int16,
            8 => Self::UInt16,
            9 => Self::Int32,
            10 => Self::UInt32,
            11 => Self::Int64,
            12 => Self::UInt64,
            13 => Self::Single,
            14 => Self::Double,
            15 => Self::Decimal,
            16 => Self::DateTime,
            18 => Self::String,
            other => {
                return Err(NetworkError::ProtocolViolation(format!(
                    "unrecognized type code {other}"
                )));
            }
        })
    }

    /// Frames of these codes never carry a codepage, type name, or content.
    fn is_empty_shaped(self) -> bool {
        matches!(self, Self::Empty | Self::DBNull)
    }
}

/// One decoded wire frame. `message_id`/`in_response_to_id` are the RMI
/// correlation ids (§3); both zero means a plain application message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_id: i32,
    pub in_response_to_id: i32,
    pub type_code: TypeCode,
    pub code_page: Option<CodePage>,
    pub type_name: Option<String>,
    pub content: Option<Bytes>,
}

impl Frame {
    pub fn empty(message_id: i32, in_response_to_id: i32) -> Self {
        Self {
            message_id,
            in_response_to_id,
            type_code: TypeCode::Empty,
            code_page: None,
            type_name: None,
            content: None,
        }
    }

    pub fn scalar(
        message_id: i32,
        in_response_to_id: i32,
        type_code: TypeCode,
        code_page: CodePage,
        content: Bytes,
    ) -> Self {
        Self {
            message_id,
            in_response_to_id,
            type_code,
            code_page: Some(code_page),
            type_name: None,
            content: Some(content),
        }
    }

    pub fn object(
        message_id: i32,
        in_response_to_id: i32,
        code_page: CodePage,
        type_name: String,
        content: Bytes,
    ) -> Self {
        Self {
            message_id,
            in_response_to_id,
            type_code: TypeCode::Object,
            code_page: Some(code_page),
            type_name: Some(type_name),
            content: Some(content),
        }
    }

    /// Emits the byte layout in one buffered write followed by one flush,
    /// so the frame lands atomically relative to any concurrent writer.
    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        tracing::trace!(
            message_id = self.message_id,
            in_response_to_id = self.in_response_to_id,
            type_code = ?self.type_code,
            "writing frame"
        );
        let mut buf = BytesMut::with_capacity(9);
        buf.put_i32_le(self.message_id);
        buf.put_i32_le(self.in_response_to_id);
        buf.put_u8(self.type_code as u8);

        if !self.type_code.is_empty_shaped() {
            let code_page = self.code_page.unwrap_or_default();
            buf.put_i32_le(code_page.0);

            if self.type_code == TypeCode::Object {
                let type_name = self.type_name.as_deref().unwrap_or_default();
                let (encoded, _, _) = code_page.encoding().encode(type_name);
                buf.put_i32_le(encoded.len() as i32);
                buf.put_slice(&encoded);
            }

            let content = self.content.as_deref().unwrap_or(&[]);
            buf.put_i32_le(content.len() as i32);
            buf.put_slice(content);
        }

        writer.write_all(&buf).await.map_err(NetworkError::from)?;
        writer.flush().await.map_err(NetworkError::from)?;
        tracing::debug!(bytes = buf.len(), "wrote frame");
        Ok(())
    }

    /// Reads the fixed 9-byte header, then the variable tail for the
    /// decoded [`TypeCode`]. An EOF while reading the header or mid-frame
    /// is reported as [`NetworkError::ConnectionBroken`].
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
        tracing::trace!("reading frame header");
        let mut header = [0u8; 9];
        read_exact_or_broken(reader, &mut header).await?;

        let mut cursor = &header[..];
        let message_id = cursor.get_i32_le();
        let in_response_to_id = cursor.get_i32_le();
        let type_code = TypeCode::from_u8(cursor.get_u8())?;

        if type_code.is_empty_shaped() {
            tracing::debug!(message_id, in_response_to_id, type_code = ?type_code, "read frame");
            return Ok(Frame {
                message_id,
                in_response_to_id,
                type_code,
                code_page: None,
                type_name: None,
                content: None,
            });
        }

        let code_page = CodePage(read_i32(reader).await?);

        let type_name = if type_code == TypeCode::Object {
            let name_len = read_i32(reader).await?;
            let name_len = non_negative_len(name_len)?;
            let mut name_bytes = vec![0u8; name_len];
            read_exact_or_broken(reader, &mut name_bytes).await?;
            let (decoded, _, had_errors) = code_page.encoding().decode(&name_bytes);
            if had_errors {
                return Err(NetworkError::ProtocolViolation(
                    "type name is not valid in the declared code page".into(),
                ));
            }
            Some(decoded.into_owned())
        } else {
            None
        };

        let content_len = read_i32(reader).await?;
        let content_len = non_negative_len(content_len)?;
        let mut content = vec![0u8; content_len];
        read_exact_or_broken(reader, &mut content).await?;

        tracing::debug!(
            message_id,
            in_response_to_id,
            type_code = ?type_code,
            content_len,
            "read frame"
        );
        Ok(Frame {
            message_id,
            in_response_to_id,
            type_code,
            code_page: Some(code_page),
            type_name,
            content: Some(Bytes::from(content)),
        })
    }
}

fn non_negative_len(len: i32) -> Result<usize> {
    if len < 0 {
        Err(NetworkError::ProtocolViolation(format!(
            "negative length field ({len})"
        )))
    } else {
        Ok(len as usize)
    }
}

async fn read_i32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_exact_or_broken(reader, &mut buf).await?;
    Ok(i32::from_le_bytes(buf))
}

async fn read_exact_or_broken<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(NetworkError::ConnectionBroken)
        }
        Err(err) => Err(NetworkError::from(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_empty_frame() {
        let frame = Frame::empty(0, 0);
        let mut buf = Vec::new();
        frame.write(&mut buf).await.unwrap();
        let decoded = Frame::read(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded.message_id, 0);
        assert_eq!(decoded.in_response_to_id, 0);
        assert_eq!(decoded.type_code, TypeCode::Empty);
        assert!(decoded.content.is_none());
    }

    #[tokio::test]
    async fn round_trips_string_frame() {
        let frame = Frame::scalar(
            7,
            0,
            TypeCode::String,
            CodePage::UTF8,
            Bytes::from_static(b"hello"),
        );
        let mut buf = Vec::new();
        frame.write(&mut buf).await.unwrap();
        let decoded = Frame::read(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded.message_id, 7);
        assert_eq!(decoded.content.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn round_trips_object_frame_with_type_name() {
        let frame = Frame::object(
            3,
            0,
            CodePage::UTF8,
            "hotaru_rpc::test::Ping, hotaru_rpc".to_string(),
            Bytes::from_static(b"{}"),
        );
        let mut buf = Vec::new();
        frame.write(&mut buf).await.unwrap();
        let decoded = Frame::read(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("hotaru_rpc::test::Ping, hotaru_rpc"));
        assert_eq!(decoded.content.unwrap(), Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_connection_broken() {
        let header = {
            let mut buf = BytesMut::new();
            buf.put_i32_le(1);
            buf.put_i32_le(0);
            buf.put_u8(TypeCode::String as u8);
            buf.put_i32_le(CodePage::UTF8.0);
            // Declare content length but never write it.
            buf.put_i32_le(10);
            buf
        };
        let mut cursor: &[u8] = &header;
        let err = Frame::read(&mut cursor).await.unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionBroken));
    }
}
