// driver_info.rs — Driver-info record ABI
//
// The runtime driver describes one kernel launch with a record passed to the
// expanded function by pointer. Its leading fields are a fixed ABI shared
// with the driver: field order and types below must never change. Drivers may
// append private fields after `usrLen`; expanded functions never read them.
//
//   inPtr     [K x i8*]   base address of each input buffer
//   inStride  [K x i32]   byte stride of each input buffer
//   inLen     i32         number of inputs bound
//   outPtr    [K x i8*]   base address of each output buffer
//   outStride [K x i32]   byte stride of each output buffer
//   outLen    i32         number of outputs bound
//   dim       dims        launch extent
//   current   dims        coordinates of the current row (y, z, ...)
//   usr       i8*         user data pointer
//   usrLen    i32         user data length in bytes
//
// `DriverInfo` is the host-side image of the record, used to launch expanded
// functions in the interpreter.

use thiserror::Error;

use crate::ir::Module;
use crate::types::{Layout, PointerWidth, StructDef, StructTable, Type};

/// Number of input/output buffer slots in the record.
pub const DRIVER_SLOTS: usize = 8;

pub const DRIVER_INFO_STRUCT: &str = "struct.KernelDriverInfoPfx";
pub const LAUNCH_DIMS_STRUCT: &str = "struct.KernelLaunchDims";

/// Field indices of the driver-info record.
pub mod field {
    pub const IN_PTR: u32 = 0;
    pub const IN_STRIDE: u32 = 1;
    pub const IN_LEN: u32 = 2;
    pub const OUT_PTR: u32 = 3;
    pub const OUT_STRIDE: u32 = 4;
    pub const OUT_LEN: u32 = 5;
    pub const DIM: u32 = 6;
    pub const CURRENT: u32 = 7;
    pub const USR: u32 = 8;
    pub const USR_LEN: u32 = 9;
}

/// Field indices of the launch-dimensions record.
pub mod dims_field {
    pub const X: u32 = 0;
    pub const Y: u32 = 1;
    pub const Z: u32 = 2;
    pub const LOD: u32 = 3;
    pub const FACE: u32 = 4;
    pub const ARRAY: u32 = 5;
}

fn slots(elem: Type) -> Type {
    Type::Array(Box::new(elem), DRIVER_SLOTS as u32)
}

fn launch_dims_fields() -> Vec<Type> {
    vec![
        Type::i32(),
        Type::i32(),
        Type::i32(),
        Type::i32(),
        Type::i32(),
        Type::Array(Box::new(Type::i32()), 4),
    ]
}

fn driver_info_fields() -> Vec<Type> {
    let dims = Type::named(LAUNCH_DIMS_STRUCT);
    vec![
        slots(Type::byte_ptr()),
        slots(Type::i32()),
        Type::i32(),
        slots(Type::byte_ptr()),
        slots(Type::i32()),
        Type::i32(),
        dims.clone(),
        dims,
        Type::byte_ptr(),
        Type::i32(),
    ]
}

/// A module already declares a record under a reserved name with a
/// different body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("struct '%{0}' is already declared with a different body")]
pub struct ConflictingStruct(pub String);

/// Declare the driver-info and launch-dimension records in `module` and
/// return the driver-info record type. Idempotent.
pub fn declare(module: &mut Module) -> Result<Type, ConflictingStruct> {
    for (name, fields) in [
        (LAUNCH_DIMS_STRUCT, launch_dims_fields()),
        (DRIVER_INFO_STRUCT, driver_info_fields()),
    ] {
        match module.structs.get(name) {
            Some(StructDef::Body(existing)) if *existing == fields => {}
            Some(_) => return Err(ConflictingStruct(name.to_string())),
            None => module.ensure_struct(name, fields),
        }
    }
    Ok(Type::named(DRIVER_INFO_STRUCT))
}

// ── Host-side image ─────────────────────────────────────────────────────────

/// One bound buffer: base address and byte stride between elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferBinding {
    pub ptr: u64,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchDims {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub lod: u32,
    pub face: u32,
    pub array: [u32; 4],
}

/// Host-side contents of a driver-info record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DriverInfo {
    pub inputs: Vec<BufferBinding>,
    pub outputs: Vec<BufferBinding>,
    pub dim: LaunchDims,
    pub current: LaunchDims,
    pub usr: u64,
    pub usr_len: u32,
}

impl DriverInfo {
    /// Little-endian bytes of the record for a target of the given width.
    ///
    /// Panics if more than `DRIVER_SLOTS` inputs or outputs are bound.
    pub fn encode(&self, width: PointerWidth) -> Vec<u8> {
        assert!(self.inputs.len() <= DRIVER_SLOTS, "too many inputs bound");
        assert!(self.outputs.len() <= DRIVER_SLOTS, "too many outputs bound");

        let mut table = StructTable::new();
        table.insert(
            LAUNCH_DIMS_STRUCT.to_string(),
            StructDef::Body(launch_dims_fields()),
        );
        table.insert(
            DRIVER_INFO_STRUCT.to_string(),
            StructDef::Body(driver_info_fields()),
        );
        let layout = Layout::new(width, &table);
        let record = Type::named(DRIVER_INFO_STRUCT);
        let dims = Type::named(LAUNCH_DIMS_STRUCT);
        let ptr_bytes = width.bytes() as usize;

        let size = layout.alloc_size(&record).unwrap_or(0) as usize;
        let mut out = vec![0u8; size];
        let offset = |index: u32| layout.field_offset(&record, index as usize).unwrap_or(0) as usize;

        let mut put = |at: usize, value: u64, bytes: usize| {
            out[at..at + bytes].copy_from_slice(&value.to_le_bytes()[..bytes]);
        };

        for (slot, b) in self.inputs.iter().enumerate() {
            put(offset(field::IN_PTR) + slot * ptr_bytes, b.ptr, ptr_bytes);
            put(offset(field::IN_STRIDE) + slot * 4, b.stride as u64, 4);
        }
        put(offset(field::IN_LEN), self.inputs.len() as u64, 4);
        for (slot, b) in self.outputs.iter().enumerate() {
            put(offset(field::OUT_PTR) + slot * ptr_bytes, b.ptr, ptr_bytes);
            put(offset(field::OUT_STRIDE) + slot * 4, b.stride as u64, 4);
        }
        put(offset(field::OUT_LEN), self.outputs.len() as u64, 4);

        for (index, dims_value) in [(field::DIM, self.dim), (field::CURRENT, self.current)] {
            let base = offset(index);
            let scalars = [
                (dims_field::X, dims_value.x),
                (dims_field::Y, dims_value.y),
                (dims_field::Z, dims_value.z),
                (dims_field::LOD, dims_value.lod),
                (dims_field::FACE, dims_value.face),
            ];
            for (f, v) in scalars {
                let at = base + layout.field_offset(&dims, f as usize).unwrap_or(0) as usize;
                put(at, v as u64, 4);
            }
            let array_at = base + layout.field_offset(&dims, dims_field::ARRAY as usize).unwrap_or(0) as usize;
            for (i, v) in dims_value.array.iter().enumerate() {
                put(array_at + i * 4, *v as u64, 4);
            }
        }

        put(offset(field::USR), self.usr, ptr_bytes);
        put(offset(field::USR_LEN), self.usr_len as u64, 4);
        out
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn record_layout_64() {
        let mut m = Module::new(PointerWidth::W64);
        let ty = declare(&mut m).unwrap();
        let l = m.layout();
        assert_eq!(l.field_offset(&ty, field::IN_PTR as usize), Some(0));
        assert_eq!(l.field_offset(&ty, field::IN_STRIDE as usize), Some(64));
        assert_eq!(l.field_offset(&ty, field::IN_LEN as usize), Some(96));
        assert_eq!(l.field_offset(&ty, field::OUT_PTR as usize), Some(104));
        assert_eq!(l.field_offset(&ty, field::OUT_STRIDE as usize), Some(168));
        assert_eq!(l.field_offset(&ty, field::OUT_LEN as usize), Some(200));
        assert_eq!(l.field_offset(&ty, field::DIM as usize), Some(204));
        assert_eq!(l.field_offset(&ty, field::CURRENT as usize), Some(240));
        assert_eq!(l.field_offset(&ty, field::USR as usize), Some(280));
        assert_eq!(l.field_offset(&ty, field::USR_LEN as usize), Some(288));
        assert_eq!(l.alloc_size(&ty), Some(296));
    }

    #[test]
    fn record_layout_32() {
        let mut m = Module::new(PointerWidth::W32);
        let ty = declare(&mut m).unwrap();
        let l = m.layout();
        assert_eq!(l.field_offset(&ty, field::IN_STRIDE as usize), Some(32));
        assert_eq!(l.field_offset(&ty, field::OUT_PTR as usize), Some(68));
        assert_eq!(l.field_offset(&ty, field::USR as usize), Some(208));
        assert_eq!(l.alloc_size(&ty), Some(216));
    }

    #[test]
    fn declare_is_idempotent_and_detects_conflicts() {
        let mut m = Module::new(PointerWidth::W64);
        declare(&mut m).unwrap();
        declare(&mut m).unwrap();
        assert_eq!(m.structs.len(), 2);

        let mut clash = Module::new(PointerWidth::W64);
        clash
            .structs
            .insert(DRIVER_INFO_STRUCT.to_string(), StructDef::Opaque);
        assert_eq!(
            declare(&mut clash),
            Err(ConflictingStruct(DRIVER_INFO_STRUCT.to_string()))
        );
    }

    #[test]
    fn encode_places_fields() {
        let info = DriverInfo {
            inputs: vec![BufferBinding {
                ptr: 0x1000,
                stride: 4,
            }],
            outputs: vec![BufferBinding {
                ptr: 0x2000,
                stride: 8,
            }],
            current: LaunchDims {
                y: 7,
                z: 9,
                ..LaunchDims::default()
            },
            usr: 0x3000,
            usr_len: 16,
            ..DriverInfo::default()
        };
        let bytes = info.encode(PointerWidth::W64);
        assert_eq!(bytes.len(), 296);
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), 0x1000);
        assert_eq!(read_u32(&bytes, 64), 4);
        assert_eq!(read_u32(&bytes, 96), 1);
        assert_eq!(u64::from_le_bytes(bytes[104..112].try_into().unwrap()), 0x2000);
        assert_eq!(read_u32(&bytes, 168), 8);
        assert_eq!(read_u32(&bytes, 240 + 4), 7);
        assert_eq!(read_u32(&bytes, 240 + 8), 9);
        assert_eq!(u64::from_le_bytes(bytes[280..288].try_into().unwrap()), 0x3000);
        assert_eq!(read_u32(&bytes, 288), 16);
    }
}
