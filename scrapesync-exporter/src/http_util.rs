use std::time::Duration;

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, Request, Response, Uri, header, request, response};
use itertools::Itertools;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs, lookup_host},
    task::JoinSet,
};
use tracing::{debug, trace};

const HAPPY_EYEBALLS_DELAY: Duration = Duration::from_millis(150);
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

pub fn basic_request_builder(uri: &str, method: Method) -> anyhow::Result<request::Builder> {
    let uri = uri.parse::<Uri>()?;
    let authority = uri
        .authority()
        .ok_or_else(|| anyhow::anyhow!("URL error: no host name"))?
        .as_str();
    let host = authority
        .find('@')
        .map(|idx| authority.split_at(idx + 1).1)
        .unwrap_or(authority);

    if host.is_empty() {
        anyhow::bail!("URL error: empty host name");
    }

    let req = Request::builder()
        .method(method)
        .header(header::HOST, host)
        .header(header::CONNECTION, "close")
        .header(header::ACCEPT_ENCODING, "identity")
        .uri(&uri);

    Ok(req)
}

pub async fn send_http_request<T: AsRef<[u8]>>(
    req: Request<T>,
    prefer_ipv6: bool,
) -> anyhow::Result<Response<Bytes>> {
    let domain = req
        .uri()
        .host()
        .ok_or_else(|| anyhow::anyhow!("URL error: no host name"))?;
    let domain = domain
        .strip_prefix('[')
        .and_then(|d| d.strip_suffix(']'))
        .unwrap_or(domain);
    let port = req.uri().port_u16().unwrap_or(80);
    trace!("connecting to ({domain}, {port})");
    let mut stream = connect_happy_eyeballs((domain, port), prefer_ipv6).await?;

    stream.write_all(&assemble_http_request(req)?).await?;
    stream.flush().await?;

    let buffer = read_response(&mut stream, MAX_RESPONSE_SIZE).await?;
    trace!("Response: {:?}", String::from_utf8_lossy(&buffer));

    parse_http_response(buffer)
}

/// Reads until EOF, giving up once more than `limit` bytes have arrived.
async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> anyhow::Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(4096);
    while reader.read_buf(&mut buffer).await? != 0 {
        if buffer.len() > limit {
            anyhow::bail!("HTTP error: response exceeds {limit} bytes");
        }
    }

    Ok(buffer.freeze())
}

async fn connect_happy_eyeballs<A: ToSocketAddrs>(
    addr: A,
    prefer_ipv6: bool,
) -> anyhow::Result<TcpStream> {
    let addrs = {
        let (v4, v6): (Vec<_>, Vec<_>) = lookup_host(addr).await?.partition(|a| a.is_ipv4());

        let (first, second) = if prefer_ipv6 { (v6, v4) } else { (v4, v6) };
        first
            .into_iter()
            .interleave(second.into_iter())
            .collect::<Vec<_>>()
    };

    let mut attempts = JoinSet::new();
    let handle_attempt_result = move |res: Result<Result<TcpStream, _>, _>| match res {
        Ok(Ok(stream)) => {
            debug!(
                "connection established with {}",
                stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or("<unknown>".to_string())
            );
            Some(stream)
        }
        Ok(Err(e)) => {
            trace!("connection attempt failed: {e}");
            None
        }
        Err(e) => {
            trace!("connection attempt panicked: {e}");
            None
        }
    };
    for addr in addrs {
        attempts.spawn(TcpStream::connect(addr));
        while !attempts.is_empty() {
            tokio::select! {
                biased;

                res = attempts.join_next() => {
                    if let Some(res) = res {
                        if let Some(stream) = handle_attempt_result(res) {
                            return Ok(stream);
                        }
                    }
                }
                _ = tokio::time::sleep(HAPPY_EYEBALLS_DELAY) => {
                    break;
                }
            }
        }
    }

    while let Some(res) = attempts.join_next().await {
        if let Some(stream) = handle_attempt_result(res) {
            return Ok(stream);
        }
    }

    Err(anyhow::anyhow!("I/O error: all connection attempts failed"))
}

fn assemble_http_request<T: AsRef<[u8]>>(req: Request<T>) -> anyhow::Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(128);

    buffer.put_slice(
        format!(
            "{} {} {:?}\r\n",
            req.method(),
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
            req.version()
        )
        .as_bytes(),
    );

    for (name, value) in req.headers() {
        buffer.put_slice(name.as_str().as_bytes());
        buffer.put_slice(b": ");
        buffer.put(value.as_bytes());
        buffer.put_slice(b"\r\n");
    }

    buffer.put_slice(b"\r\n");

    buffer.put_slice(req.body().as_ref());

    trace!("Request: {:?}", String::from_utf8_lossy(&buffer));

    Ok(buffer.freeze())
}

fn parse_http_response(bytes: Bytes) -> anyhow::Result<Response<Bytes>> {
    const MAX_HEADERS: usize = 64;
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    let status = resp.parse(&bytes)?;

    let body_start_index = match status {
        httparse::Status::Complete(idx) => idx,
        httparse::Status::Partial => anyhow::bail!("HTTP error: response is incomplete"),
    };

    let mut response_builder = response::Builder::new()
        .status(resp.code.unwrap_or(200))
        .version(match resp.version.unwrap_or(1) {
            0 => http::Version::HTTP_10,
            _ => http::Version::HTTP_11,
        });

    for header in resp.headers.iter() {
        response_builder = response_builder.header(header.name, header.value);
    }

    let raw_body = bytes.slice(body_start_index..);
    let body = match response_builder.headers_ref() {
        Some(h) if is_chunked(h) => decode_chunked(&raw_body)?,
        Some(h) => match content_length(h)? {
            Some(len) if raw_body.len() < len => {
                anyhow::bail!("HTTP error: body shorter than Content-Length")
            }
            Some(len) => raw_body.slice(..len),
            None => raw_body,
        },
        None => raw_body,
    };

    Ok(response_builder.body(body)?)
}

fn is_chunked(headers: &http::HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &http::HeaderMap) -> anyhow::Result<Option<usize>> {
    headers
        .get(header::CONTENT_LENGTH)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .context("HTTP error: invalid Content-Length")
        })
        .transpose()
}

fn decode_chunked(mut body: &[u8]) -> anyhow::Result<Bytes> {
    let mut out = BytesMut::with_capacity(body.len());

    loop {
        let (start, size) = match httparse::parse_chunk_size(body)
            .map_err(|_| anyhow::anyhow!("HTTP error: invalid chunk size"))?
        {
            httparse::Status::Complete(chunk) => chunk,
            httparse::Status::Partial => anyhow::bail!("HTTP error: response is incomplete"),
        };
        let size = usize::try_from(size)?;
        if size == 0 {
            break;
        }

        body = &body[start..];
        let end = size.checked_add(2).context("HTTP error: invalid chunk size")?;
        if body.len() < end {
            anyhow::bail!("HTTP error: response is incomplete");
        }
        out.put_slice(&body[..size]);
        body = &body[end..];
    }

    Ok(out.freeze())
}
