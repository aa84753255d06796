// 该文件是 Zhijian （智检） 项目的一部分。
// src/fieldbus.rs - IO 板离散信号读写
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

use thiserror::Error;

/// 每次读取的离散输入位数
pub const INPUT_BITS: usize = 8;

#[derive(Error, Debug)]
pub enum IoLinkError {
  #[error("无法连接到 IO 板 {0}")]
  ConnectFailed(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("IO 板返回异常码 {code:#04x} (功能码 {function:#04x})")]
  Exception { function: u8, code: u8 },
  #[error("IO 板响应无效: {0}")]
  BadResponse(String),
}

/// 单比特离散信号的读写客户端
pub trait DiscreteIo {
  /// 建立连接，成功返回 true
  fn connect(&mut self) -> bool;
  /// 读取从地址 0 开始的 8 个离散输入
  fn read_bits(&mut self) -> Result<[bool; INPUT_BITS], IoLinkError>;
  /// 写单个输出位
  fn write_bit(&mut self, address: u16, value: bool) -> Result<(), IoLinkError>;
  fn close(&mut self);
}

impl<D: DiscreteIo + ?Sized> DiscreteIo for Box<D> {
  fn connect(&mut self) -> bool {
    (**self).connect()
  }

  fn read_bits(&mut self) -> Result<[bool; INPUT_BITS], IoLinkError> {
    (**self).read_bits()
  }

  fn write_bit(&mut self, address: u16, value: bool) -> Result<(), IoLinkError> {
    (**self).write_bit(address, value)
  }

  fn close(&mut self) {
    (**self).close()
  }
}

pub type BoxedIo = Box<dyn DiscreteIo + Send>;

mod modbus;
pub use self::modbus::ModbusTcpClient;
