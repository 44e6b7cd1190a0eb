//! Worker exchange envelope and frame codec
//!
//! Every message on a worker or daemon socket is a 4-byte big-endian length
//! followed by a JSON body of that many bytes. A zero-length body reads as
//! JSON `null`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one frame body (RAW files plus base64 overhead)
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// Host -> worker: the RAW container, base64-encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub data: String,
}

/// Worker -> host. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn success(data: String) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Write one length-prefixed JSON frame and flush
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", body.len()),
        ));
    }

    let len_bytes = (body.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one frame. `Ok(None)` means the peer closed before a length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let message = if body.is_empty() {
        serde_json::from_slice(b"null")?
    } else {
        serde_json::from_slice(&body)?
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_layout_is_length_prefixed() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &WorkerRequest { data: "QUJD".into() })
            .await
            .unwrap();

        let body = br#"{"data":"QUJD"}"#;
        assert_eq!(&buf[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], body);
    }

    #[tokio::test]
    async fn test_unknown_fields_are_ignored() {
        let body = br#"{"data":"AAAA","elapsed_ms":12,"worker":"v2"}"#;
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(body);

        let parsed: Option<Option<WorkerResponse>> =
            read_frame(&mut frame.as_slice()).await.unwrap();
        assert_eq!(
            parsed,
            Some(Some(WorkerResponse::success("AAAA".to_string())))
        );
    }

    #[tokio::test]
    async fn test_null_and_empty_bodies_are_empty_payloads() {
        let mut null_frame = 4u32.to_be_bytes().to_vec();
        null_frame.extend_from_slice(b"null");
        let parsed: Option<Option<WorkerResponse>> =
            read_frame(&mut null_frame.as_slice()).await.unwrap();
        assert_eq!(parsed, Some(None));

        let empty_frame = 0u32.to_be_bytes().to_vec();
        let parsed: Option<Option<WorkerResponse>> =
            read_frame(&mut empty_frame.as_slice()).await.unwrap();
        assert_eq!(parsed, Some(None));
    }

    #[tokio::test]
    async fn test_closed_stream_reads_none() {
        let parsed: Option<WorkerResponse> = read_frame(&mut &b""[..]).await.unwrap();
        assert!(parsed.is_none());
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let mut frame = 10u32.to_be_bytes().to_vec();
        frame.extend_from_slice(b"{\"da");
        let parsed: std::io::Result<Option<WorkerResponse>> =
            read_frame(&mut frame.as_slice()).await;
        assert!(parsed.is_err());
    }
}
