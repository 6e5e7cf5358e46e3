//! 字节码块 (Core 层)
//!
//! 指令流 + 常量池 + 稀疏行号表。不依赖运行时实现。

use std::collections::BTreeMap;

use super::bytecode::{IndexedOp, OpCode};
use super::value::Value;

/// 字节码块
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    /// 指令字节码
    pub code: Vec<u8>,
    /// 常量池
    pub constants: Vec<Value>,
    /// 稀疏行号表：指令起始偏移 -> 源码行
    lines: BTreeMap<usize, u32>,
}

impl Chunk {
    /// 创建新的字节码块
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    // ==================== 写入 ====================

    /// 写入操作码，仅在行号变化时记录行号
    pub fn write_op(&mut self, op: OpCode, line: u32) {
        let offset = self.code.len();
        if self.line_at(offset) != Some(line) {
            self.lines.insert(offset, line);
        }
        self.code.push(op.into());
    }

    /// 写入 u8 操作数
    pub fn write_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// 写入 u16 操作数
    pub fn write_short(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// 写入 3 字节操作数（高字节被截断）
    pub fn write_long(&mut self, value: u32) {
        let bytes = value.to_le_bytes();
        self.code.extend_from_slice(&bytes[..3]);
    }

    /// 写入索引型指令，自动选择窄/宽格式
    pub fn write_indexed(&mut self, op: IndexedOp, index: usize, line: u32) {
        let selected = op.select(index);
        self.write_op(selected, line);
        if IndexedOp::is_wide(index) {
            self.write_long(index as u32);
        } else {
            self.write_byte(index as u8);
        }
    }

    /// 覆写已写入的字节（跳转回填）
    pub fn rewrite(&mut self, offset: usize, byte: u8) {
        self.code[offset] = byte;
    }

    /// 添加常量，返回其索引
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    // ==================== 读取 ====================

    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    pub fn read_short(&self, offset: usize) -> Option<u16> {
        let bytes = self.code.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_long(&self, offset: usize) -> Option<u32> {
        let bytes = self.code.get(offset..offset + 3)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    /// 任意偏移对应的源码行：向前找最近的记录
    pub fn line_at(&self, offset: usize) -> Option<u32> {
        self.lines.range(..=offset).next_back().map(|(_, line)| *line)
    }

    /// 已记录的行号条目数
    pub fn line_entries(&self) -> usize {
        self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_op() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Add, 1);
        assert_eq!(chunk.code, vec![OpCode::Add as u8]);
        assert_eq!(chunk.line_at(0), Some(1));
    }

    #[test]
    fn test_sparse_lines() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::True, 1);
        chunk.write_op(OpCode::Pop, 3);
        assert_eq!(chunk.line_entries(), 2);
        assert_eq!(chunk.line_at(2), Some(1));
        assert_eq!(chunk.line_at(3), Some(3));
        assert_eq!(chunk.line_at(100), Some(3));
        assert_eq!(Chunk::new().line_at(0), None);
    }

    #[test]
    fn test_operands_little_endian() {
        let mut chunk = Chunk::new();
        chunk.write_short(0x1234);
        chunk.write_long(0x00AB_CDEF);
        assert_eq!(chunk.code, vec![0x34, 0x12, 0xEF, 0xCD, 0xAB]);
        assert_eq!(chunk.read_short(0), Some(0x1234));
        assert_eq!(chunk.read_long(2), Some(0x00AB_CDEF));
        assert_eq!(chunk.read_long(3), None);
    }

    #[test]
    fn test_write_indexed_threshold() {
        let mut chunk = Chunk::new();
        chunk.write_indexed(IndexedOp::CONSTANT, 254, 1);
        assert_eq!(chunk.code, vec![OpCode::Constant as u8, 254]);

        let mut chunk = Chunk::new();
        chunk.write_indexed(IndexedOp::CONSTANT, 255, 1);
        assert_eq!(chunk.code, vec![OpCode::ConstantLong as u8, 255, 0, 0]);
    }

    #[test]
    fn test_add_constant() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.add_constant(Value::Int(1)), 0);
        assert_eq!(chunk.add_constant(Value::Int(2)), 1);
        assert_eq!(chunk.constants[1], Value::Int(2));
    }
}
