//! 带标记-清除垃圾回收的对象注册表
//!
//! 所有堆对象都经 [`Heap::alloc`] 进入注册表，只有清除阶段会销毁对象。
//! 标记位只在本模块内被修改。

use thiserror::Error;
use tracing::{debug, trace};

use enact_config::GcConfig;

use crate::core::{Obj, ObjArray, ObjClosure, ObjFunction, ObjRef, ObjUpvalue, UpvalueState, Value};

/// 堆相关错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// 无效句柄（已回收或越界）
    #[error("invalid object reference {0:?}")]
    InvalidRef(ObjRef),
    /// 对象类型不匹配
    #[error("expected a {expected} object at {at:?}, found a {found}")]
    WrongKind {
        at: ObjRef,
        expected: &'static str,
        found: &'static str,
    },
}

// ==================== 根集合 ====================

/// 根收集器：只记录根，标记在回收阶段统一进行
#[derive(Debug, Default)]
pub struct Tracer {
    roots: Vec<ObjRef>,
}

impl Tracer {
    pub fn value(&mut self, value: &Value) {
        if let Value::Obj(r) = value {
            self.roots.push(*r);
        }
    }

    pub fn object(&mut self, r: ObjRef) {
        self.roots.push(r);
    }
}

/// 能够枚举 GC 根的组件（VM 状态、代码生成器的活动记录链）
pub trait Roots {
    fn trace_roots(&self, heap: &Heap, tracer: &mut Tracer);
}

/// 空根集合
pub struct NoRoots;

impl Roots for NoRoots {
    fn trace_roots(&self, _heap: &Heap, _tracer: &mut Tracer) {}
}

/// 两个根集合的并集
pub struct BothRoots<'a>(pub &'a dyn Roots, pub &'a dyn Roots);

impl Roots for BothRoots<'_> {
    fn trace_roots(&self, heap: &Heap, tracer: &mut Tracer) {
        self.0.trace_roots(heap, tracer);
        self.1.trace_roots(heap, tracer);
    }
}

// ==================== 堆 ====================

#[derive(Debug)]
struct Slot {
    obj: Obj,
    marked: bool,
    /// 分配时计入的字节数，清除时原样扣回
    size: usize,
}

/// 堆统计信息
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapStats {
    pub objects: usize,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub collections: usize,
}

/// 对象注册表 + 标记-清除收集器
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free_indices: Vec<u32>,
    grey: Vec<ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
    growth_factor: usize,
    stress: bool,
    collections: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(&GcConfig::default())
    }
}

impl Heap {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            grey: Vec::new(),
            bytes_allocated: 0,
            next_gc: config.initial_threshold,
            growth_factor: config.growth_factor.max(1),
            stress: config.stress,
            collections: 0,
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            objects: self.slots.len() - self.free_indices.len(),
            bytes_allocated: self.bytes_allocated,
            next_gc: self.next_gc,
            collections: self.collections,
        }
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        matches!(self.slots.get(r.index()), Some(Some(_)))
    }

    // ==================== 分配 ====================

    /// 唯一的分配入口
    ///
    /// 加上新对象后超过阈值（或压力模式）时先回收，再计入字节数并注册对象。
    /// 回收后的阈值只按存活对象计算。
    /// `obj` 引用的其他对象必须已经能从 `roots` 到达。
    pub fn alloc(&mut self, obj: Obj, roots: &dyn Roots) -> ObjRef {
        let size = obj.size();
        if self.stress || self.bytes_allocated + size > self.next_gc {
            self.collect(roots);
        }
        self.bytes_allocated += size;

        let kind = obj.kind();
        let slot = Slot {
            obj,
            marked: false,
            size,
        };
        let r = match self.free_indices.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(slot);
                ObjRef(idx)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef((self.slots.len() - 1) as u32)
            }
        };
        trace!(target: "enact::gc", "{:?} allocate {} bytes for {}", r, size, kind);
        r
    }

    /// 对象内容增长后重新计入它的字节数（不触发回收）
    pub fn recharge(&mut self, r: ObjRef) -> Result<(), HeapError> {
        match self.slots.get_mut(r.index()) {
            Some(Some(slot)) => {
                let size = slot.obj.size();
                self.bytes_allocated = self.bytes_allocated - slot.size + size;
                trace!(target: "enact::gc", "{:?} recharge {} -> {} bytes", r, slot.size, size);
                slot.size = size;
                Ok(())
            }
            _ => Err(HeapError::InvalidRef(r)),
        }
    }

    /// 复制字符串或数组，返回新对象（原对象必须仍可从根到达）
    pub fn clone_object(&mut self, r: ObjRef, roots: &dyn Roots) -> Result<ObjRef, HeapError> {
        let copy = self.get(r)?.clone();
        Ok(self.alloc(copy, roots))
    }

    // ==================== 访问 ====================

    pub fn get(&self, r: ObjRef) -> Result<&Obj, HeapError> {
        match self.slots.get(r.index()) {
            Some(Some(slot)) => Ok(&slot.obj),
            _ => Err(HeapError::InvalidRef(r)),
        }
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Result<&mut Obj, HeapError> {
        match self.slots.get_mut(r.index()) {
            Some(Some(slot)) => Ok(&mut slot.obj),
            _ => Err(HeapError::InvalidRef(r)),
        }
    }

    pub fn string(&self, r: ObjRef) -> Result<&str, HeapError> {
        match self.get(r)? {
            Obj::String(s) => Ok(&s.chars),
            other => Err(wrong_kind(r, "string", other)),
        }
    }

    pub fn array(&self, r: ObjRef) -> Result<&ObjArray, HeapError> {
        match self.get(r)? {
            Obj::Array(a) => Ok(a),
            other => Err(wrong_kind(r, "array", other)),
        }
    }

    pub fn array_mut(&mut self, r: ObjRef) -> Result<&mut ObjArray, HeapError> {
        match self.get_mut(r)? {
            Obj::Array(a) => Ok(a),
            other => Err(wrong_kind(r, "array", other)),
        }
    }

    pub fn function(&self, r: ObjRef) -> Result<&ObjFunction, HeapError> {
        match self.get(r)? {
            Obj::Function(f) => Ok(f),
            other => Err(wrong_kind(r, "function", other)),
        }
    }

    pub fn function_mut(&mut self, r: ObjRef) -> Result<&mut ObjFunction, HeapError> {
        match self.get_mut(r)? {
            Obj::Function(f) => Ok(f),
            other => Err(wrong_kind(r, "function", other)),
        }
    }

    pub fn closure(&self, r: ObjRef) -> Result<&ObjClosure, HeapError> {
        match self.get(r)? {
            Obj::Closure(c) => Ok(c),
            other => Err(wrong_kind(r, "closure", other)),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> Result<&ObjUpvalue, HeapError> {
        match self.get(r)? {
            Obj::Upvalue(u) => Ok(u),
            other => Err(wrong_kind(r, "upvalue", other)),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> Result<&mut ObjUpvalue, HeapError> {
        match self.get_mut(r)? {
            Obj::Upvalue(u) => Ok(u),
            other => Err(wrong_kind(r, "upvalue", other)),
        }
    }

    // ==================== 回收 ====================

    /// 一次完整的回收周期：标记根 -> 追踪灰色集合 -> 清除 -> 调整阈值
    pub fn collect(&mut self, roots: &dyn Roots) {
        let before = self.bytes_allocated;
        debug!(target: "enact::gc", "-- gc begin ({} bytes)", before);

        let mut tracer = Tracer::default();
        roots.trace_roots(self, &mut tracer);
        for r in tracer.roots {
            self.mark_object(r);
        }

        while let Some(r) = self.grey.pop() {
            self.blacken(r);
        }

        let freed = self.sweep();
        self.next_gc = self.bytes_allocated * self.growth_factor;
        self.collections += 1;

        debug!(
            target: "enact::gc",
            "-- gc end: freed {} objects, {} -> {} bytes, next at {}",
            freed,
            before,
            self.bytes_allocated,
            self.next_gc
        );
    }

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    fn mark_object(&mut self, r: ObjRef) {
        if let Some(Some(slot)) = self.slots.get_mut(r.index()) {
            if slot.marked {
                return;
            }
            slot.marked = true;
            trace!(target: "enact::gc", "{:?} mark {}", r, slot.obj.kind());
            self.grey.push(r);
        }
    }

    /// 把一个灰色对象引用的对象全部标记
    fn blacken(&mut self, r: ObjRef) {
        let mut children: Vec<Value> = Vec::new();
        match self.get(r) {
            Ok(Obj::Closure(c)) => {
                children.push(Value::Obj(c.function));
                children.extend(c.upvalues.iter().map(|u| Value::Obj(*u)));
            }
            Ok(Obj::Function(f)) => children.extend_from_slice(&f.chunk.constants),
            Ok(Obj::Upvalue(u)) => {
                if let UpvalueState::Closed(v) = u.state {
                    children.push(v);
                }
            }
            Ok(Obj::Array(a)) => children.extend_from_slice(&a.elements),
            Ok(Obj::String(_) | Obj::Native(_) | Obj::TypeHandle(_)) | Err(_) => {}
        }
        trace!(target: "enact::gc", "{:?} blacken ({} children)", r, children.len());
        for child in children {
            self.mark_value(child);
        }
    }

    /// 释放未标记对象，清除存活对象的标记
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (idx, entry) in self.slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            if slot.marked {
                slot.marked = false;
                continue;
            }
            trace!(target: "enact::gc", "#{} free {}", idx, slot.obj.kind());
            self.bytes_allocated -= slot.size;
            *entry = None;
            self.free_indices.push(idx as u32);
            freed += 1;
        }
        freed
    }

    #[cfg(test)]
    fn any_marked(&self) -> bool {
        self.slots.iter().flatten().any(|slot| slot.marked)
    }
}

fn wrong_kind(at: ObjRef, expected: &'static str, found: &Obj) -> HeapError {
    HeapError::WrongKind {
        at,
        expected,
        found: found.kind(),
    }
}

// ==================== 测试 ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Chunk, Type};

    struct ValueRoots(Vec<Value>);

    impl Roots for ValueRoots {
        fn trace_roots(&self, _heap: &Heap, tracer: &mut Tracer) {
            for v in &self.0 {
                tracer.value(v);
            }
        }
    }

    fn function(heap: &mut Heap, constants: Vec<Value>) -> ObjRef {
        let mut chunk = Chunk::new();
        chunk.constants = constants;
        heap.alloc(
            Obj::Function(ObjFunction {
                name: "f".into(),
                arity: 0,
                upvalue_count: 0,
                chunk,
                ty: Type::function(vec![], Type::Nothing),
            }),
            &NoRoots,
        )
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = Heap::default();
        let kept = heap.alloc(Obj::string("kept"), &NoRoots);
        let dropped = heap.alloc(Obj::string("dropped"), &NoRoots);

        heap.collect(&ValueRoots(vec![Value::Obj(kept)]));

        assert!(heap.contains(kept));
        assert!(!heap.contains(dropped));
        assert_eq!(heap.stats().objects, 1);
        assert!(!heap.any_marked());
    }

    #[test]
    fn test_tracing_through_function_constants() {
        let mut heap = Heap::default();
        let s = heap.alloc(Obj::string("constant"), &NoRoots);
        let f = function(&mut heap, vec![Value::Obj(s)]);
        let closure = heap.alloc(
            Obj::Closure(ObjClosure {
                function: f,
                upvalues: Box::new([]),
            }),
            &NoRoots,
        );

        heap.collect(&ValueRoots(vec![Value::Obj(closure)]));
        assert!(heap.contains(s));
        assert!(heap.contains(f));
    }

    #[test]
    fn test_open_upvalue_does_not_trace_slot() {
        let mut heap = Heap::default();
        let up = heap.alloc(Obj::Upvalue(ObjUpvalue::open(3, None)), &NoRoots);
        let s = heap.alloc(Obj::string("only closed values are traced"), &NoRoots);

        heap.collect(&ValueRoots(vec![Value::Obj(up)]));
        assert!(heap.contains(up));
        assert!(!heap.contains(s));
    }

    #[test]
    fn test_closed_upvalue_keeps_value_alive() {
        let mut heap = Heap::default();
        let s = heap.alloc(Obj::string("captured"), &NoRoots);
        let up = heap.alloc(
            Obj::Upvalue(ObjUpvalue {
                state: UpvalueState::Closed(Value::Obj(s)),
                next: None,
            }),
            &NoRoots,
        );

        heap.collect(&ValueRoots(vec![Value::Obj(up)]));
        assert!(heap.contains(s));
    }

    #[test]
    fn test_threshold_is_twice_live_bytes() {
        let mut heap = Heap::default();
        let kept = heap.alloc(Obj::string("kept"), &NoRoots);
        heap.alloc(Obj::string("garbage"), &NoRoots);

        heap.collect(&ValueRoots(vec![Value::Obj(kept)]));
        let stats = heap.stats();
        assert_eq!(stats.bytes_allocated, Obj::string("kept").size());
        assert_eq!(stats.next_gc, stats.bytes_allocated * 2);
    }

    #[test]
    fn test_stress_collects_on_every_allocation() {
        let mut heap = Heap::new(&GcConfig {
            stress: true,
            ..GcConfig::default()
        });
        heap.alloc(Obj::string("a"), &NoRoots);
        heap.alloc(Obj::string("b"), &NoRoots);
        heap.alloc(Obj::string("c"), &NoRoots);
        assert_eq!(heap.stats().collections, 3);
        // 每次分配前回收，未被引用的前一个对象都被释放
        assert_eq!(heap.stats().objects, 1);
    }

    #[test]
    fn test_threshold_triggers_collection() {
        let mut heap = Heap::new(&GcConfig {
            initial_threshold: 0,
            ..GcConfig::default()
        });
        heap.alloc(Obj::string("a"), &NoRoots);
        assert_eq!(heap.stats().collections, 1);
    }

    #[test]
    fn test_triggered_threshold_excludes_pending_object() {
        let mut heap = Heap::new(&GcConfig {
            initial_threshold: 0,
            ..GcConfig::default()
        });
        let s = heap.alloc(Obj::string("pending"), &NoRoots);
        let stats = heap.stats();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.next_gc, 0);
        assert_eq!(stats.bytes_allocated, heap.get(s).map(Obj::size).unwrap_or(0));
    }

    #[test]
    fn test_recharge_tracks_grown_function() {
        let mut heap = Heap::default();
        let f = function(&mut heap, vec![]);
        let before = heap.stats().bytes_allocated;
        if let Ok(func) = heap.function_mut(f) {
            func.chunk.constants = vec![Value::Int(1); 16];
        }
        heap.recharge(f).unwrap();
        let grown = heap.get(f).map(Obj::size).unwrap();
        assert!(grown > before);
        assert_eq!(heap.stats().bytes_allocated, grown);

        heap.collect(&NoRoots);
        assert_eq!(heap.stats().bytes_allocated, 0);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut heap = Heap::default();
        let first = heap.alloc(Obj::string("first"), &NoRoots);
        heap.collect(&NoRoots);
        let second = heap.alloc(Obj::string("second"), &NoRoots);
        assert_eq!(first, second);
        assert_eq!(heap.string(second), Ok("second"));
    }

    #[test]
    fn test_wrong_kind() {
        let mut heap = Heap::default();
        let s = heap.alloc(Obj::string("x"), &NoRoots);
        assert!(matches!(heap.function(s), Err(HeapError::WrongKind { .. })));
        heap.collect(&NoRoots);
        assert_eq!(heap.string(s), Err(HeapError::InvalidRef(s)));
    }
}
