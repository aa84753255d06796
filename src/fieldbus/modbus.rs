// 该文件是 Zhijian （智检） 项目的一部分。
// src/fieldbus/modbus.rs - Modbus/TCP IO 板客户端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::PlcSettings,
  fieldbus::{DiscreteIo, INPUT_BITS, IoLinkError},
};

const MODBUS_TIMEOUT: Duration = Duration::from_secs(5);
const MODBUS_CONNECT_RETRIES: u32 = 3;
const MODBUS_DEFAULT_PORT: u16 = 502;
const MBAP_HEADER_LEN: usize = 7;

const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
const FC_WRITE_SINGLE_COIL: u8 = 0x05;
const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// 组装 MBAP 头 + PDU
fn encode_frame(transaction: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
  let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
  frame.extend_from_slice(&transaction.to_be_bytes());
  frame.extend_from_slice(&0u16.to_be_bytes());
  frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
  frame.push(unit_id);
  frame.extend_from_slice(pdu);
  frame
}

pub(crate) fn encode_read_discrete_inputs(
  transaction: u16,
  unit_id: u8,
  start: u16,
  count: u16,
) -> Vec<u8> {
  let mut pdu = vec![FC_READ_DISCRETE_INPUTS];
  pdu.extend_from_slice(&start.to_be_bytes());
  pdu.extend_from_slice(&count.to_be_bytes());
  encode_frame(transaction, unit_id, &pdu)
}

pub(crate) fn encode_write_single_coil(
  transaction: u16,
  unit_id: u8,
  address: u16,
  value: bool,
) -> Vec<u8> {
  let mut pdu = vec![FC_WRITE_SINGLE_COIL];
  pdu.extend_from_slice(&address.to_be_bytes());
  pdu.extend_from_slice(&(if value { COIL_ON } else { COIL_OFF }).to_be_bytes());
  encode_frame(transaction, unit_id, &pdu)
}

/// 校验响应 MBAP 头与请求一致，返回长度字段
fn check_header(header: &[u8; MBAP_HEADER_LEN], request: &[u8]) -> Result<usize, IoLinkError> {
  if header[0..2] != request[0..2] {
    return Err(IoLinkError::BadResponse("事务号不匹配".to_string()));
  }
  if header[2..4] != [0, 0] {
    return Err(IoLinkError::BadResponse(format!(
      "协议号无效: {:02x?}",
      &header[2..4]
    )));
  }
  if header[6] != request[6] {
    return Err(IoLinkError::BadResponse(format!(
      "单元号不匹配: 期望 {}, 实际 {}",
      request[6], header[6]
    )));
  }
  let length = u16::from_be_bytes([header[4], header[5]]) as usize;
  if length < 2 {
    return Err(IoLinkError::BadResponse(format!("长度字段无效: {}", length)));
  }
  Ok(length)
}

/// 检查响应 PDU 的功能码，异常响应转为错误
fn check_function(pdu: &[u8], function: u8) -> Result<(), IoLinkError> {
  match pdu.first() {
    Some(&f) if f == function => Ok(()),
    Some(&f) if f == function | 0x80 => Err(IoLinkError::Exception {
      function,
      code: pdu.get(1).copied().unwrap_or(0),
    }),
    Some(&f) => Err(IoLinkError::BadResponse(format!(
      "功能码不匹配: 期望 {:#04x}, 实际 {:#04x}",
      function, f
    ))),
    None => Err(IoLinkError::BadResponse("响应为空".to_string())),
  }
}

pub(crate) fn decode_discrete_inputs(pdu: &[u8]) -> Result<[bool; INPUT_BITS], IoLinkError> {
  check_function(pdu, FC_READ_DISCRETE_INPUTS)?;
  let byte_count = *pdu
    .get(1)
    .ok_or_else(|| IoLinkError::BadResponse("缺少字节数".to_string()))? as usize;
  let data = pdu
    .get(2..2 + byte_count)
    .ok_or_else(|| IoLinkError::BadResponse("数据长度不足".to_string()))?;
  let byte = *data
    .first()
    .ok_or_else(|| IoLinkError::BadResponse("没有输入数据".to_string()))?;

  // 低位在前
  let mut bits = [false; INPUT_BITS];
  for (i, bit) in bits.iter_mut().enumerate() {
    *bit = byte & (1 << i) != 0;
  }
  Ok(bits)
}

pub(crate) fn decode_write_single_coil(pdu: &[u8], address: u16, value: bool) -> Result<(), IoLinkError> {
  check_function(pdu, FC_WRITE_SINGLE_COIL)?;
  let mut expected = vec![FC_WRITE_SINGLE_COIL];
  expected.extend_from_slice(&address.to_be_bytes());
  expected.extend_from_slice(&(if value { COIL_ON } else { COIL_OFF }).to_be_bytes());
  if pdu != expected.as_slice() {
    return Err(IoLinkError::BadResponse(format!("写线圈回显不一致: {:02x?}", pdu)));
  }
  Ok(())
}

/// Modbus/TCP IO 板客户端
///
/// 连接在首次读写时建立，出错后断开，下次读写时重连。
pub struct ModbusTcpClient {
  host: String,
  port: u16,
  unit_id: u8,
  timeout: Duration,
  retries: u32,
  transaction: u16,
  stream: Option<TcpStream>,
}

impl FromUrlWithScheme for ModbusTcpClient {
  const SCHEME: &'static str = "modbus";
}

impl FromUrl for ModbusTcpClient {
  type Error = IoLinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(IoLinkError::BadResponse(format!(
        "期望方案 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    let host = url
      .host_str()
      .ok_or_else(|| IoLinkError::ConnectFailed(url.to_string()))?;
    let unit_id = url
      .query_pairs()
      .find(|(k, _)| k == "unit")
      .and_then(|(_, v)| v.parse().ok())
      .unwrap_or(1);
    Ok(Self::new(host, url.port().unwrap_or(MODBUS_DEFAULT_PORT), unit_id))
  }
}

impl ModbusTcpClient {
  pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
    Self {
      host: host.into(),
      port,
      unit_id,
      timeout: MODBUS_TIMEOUT,
      retries: MODBUS_CONNECT_RETRIES,
      transaction: 0,
      stream: None,
    }
  }

  pub fn from_settings(settings: &PlcSettings) -> Self {
    Self::new(settings.ip.clone(), settings.port, settings.unit_id)
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn endpoint(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  fn resolve(&self) -> Option<SocketAddr> {
    (self.host.as_str(), self.port)
      .to_socket_addrs()
      .ok()
      .and_then(|mut addrs| addrs.next())
  }

  fn open_stream(&self) -> Result<TcpStream, IoLinkError> {
    let addr = self
      .resolve()
      .ok_or_else(|| IoLinkError::ConnectFailed(self.endpoint()))?;

    for attempt in 1..=self.retries {
      match TcpStream::connect_timeout(&addr, self.timeout) {
        Ok(stream) => {
          stream.set_read_timeout(Some(self.timeout))?;
          stream.set_write_timeout(Some(self.timeout))?;
          stream.set_nodelay(true)?;
          info!("已连接到 IO 板 {}", addr);
          return Ok(stream);
        }
        Err(e) => warn!("连接 IO 板 {} 失败 ({}/{}): {}", addr, attempt, self.retries, e),
      }
    }
    Err(IoLinkError::ConnectFailed(self.endpoint()))
  }

  fn next_transaction(&mut self) -> u16 {
    self.transaction = self.transaction.wrapping_add(1);
    self.transaction
  }

  /// 发送一帧请求并返回响应 PDU
  fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, IoLinkError> {
    if self.stream.is_none() {
      self.stream = Some(self.open_stream()?);
    }
    let result = match self.stream.as_mut() {
      Some(stream) => Self::round_trip(stream, request),
      None => Err(IoLinkError::ConnectFailed(self.endpoint())),
    };
    if result.is_err() {
      // 出错后连接状态未知，丢弃
      self.stream = None;
    }
    result
  }

  fn round_trip(stream: &mut TcpStream, request: &[u8]) -> Result<Vec<u8>, IoLinkError> {
    stream.write_all(request)?;

    let mut header = [0u8; MBAP_HEADER_LEN];
    stream.read_exact(&mut header)?;
    let length = check_header(&header, request)?;
    let mut pdu = vec![0u8; length - 1];
    stream.read_exact(&mut pdu)?;
    debug!("IO 板响应: {:02x?}", pdu);
    Ok(pdu)
  }
}

impl DiscreteIo for ModbusTcpClient {
  fn connect(&mut self) -> bool {
    if self.stream.is_some() {
      return true;
    }
    match self.open_stream() {
      Ok(stream) => {
        self.stream = Some(stream);
        true
      }
      Err(e) => {
        error!("{}", e);
        false
      }
    }
  }

  fn read_bits(&mut self) -> Result<[bool; INPUT_BITS], IoLinkError> {
    let transaction = self.next_transaction();
    let request = encode_read_discrete_inputs(transaction, self.unit_id, 0, INPUT_BITS as u16);
    let pdu = self.exchange(&request)?;
    decode_discrete_inputs(&pdu)
  }

  fn write_bit(&mut self, address: u16, value: bool) -> Result<(), IoLinkError> {
    let transaction = self.next_transaction();
    let request = encode_write_single_coil(transaction, self.unit_id, address, value);
    let pdu = self.exchange(&request)?;
    decode_write_single_coil(&pdu, address, value)?;
    debug!("成功写入值 {} 到 IO 板输出位 DO{}", value, address);
    Ok(())
  }

  fn close(&mut self) {
    if let Some(stream) = self.stream.take() {
      let _ = stream.shutdown(std::net::Shutdown::Both);
    }
  }
}

impl Drop for ModbusTcpClient {
  fn drop(&mut self) {
    self.close();
  }
}
