//! Kernel structure offsets from BTF
//!
//! The running kernel describes its own structures in
//! `/sys/kernel/btf/vmlinux`. [`KernelBtf`] reads that type information and
//! fills a [`KernelLayout`] with the offset of every field the BPF programs
//! read, so a default run decodes the protocol, the socket options and the mount
//! namespace without per-kernel configuration. Fields the kernel does not
//! describe keep the value they already had.
//!
//! Only little-endian BTF is understood; bitfields are located by bit
//! offset from the start of their structure.

use crate::errors::{BindsnoopError, Result};
use bindsnoop_common::{FieldSpec, KernelLayout};
use bytes::{Buf, Bytes};
use std::fs;
use std::path::Path;

pub const VMLINUX_BTF_PATH: &str = "/sys/kernel/btf/vmlinux";

const BTF_MAGIC: u16 = 0xeb9f;
const HEADER_LEN: usize = 24;
const MAX_TYPE_DEPTH: usize = 32;

const KIND_INT: u32 = 1;
const KIND_PTR: u32 = 2;
const KIND_ARRAY: u32 = 3;
const KIND_STRUCT: u32 = 4;
const KIND_UNION: u32 = 5;
const KIND_ENUM: u32 = 6;
const KIND_FWD: u32 = 7;
const KIND_TYPEDEF: u32 = 8;
const KIND_VOLATILE: u32 = 9;
const KIND_CONST: u32 = 10;
const KIND_RESTRICT: u32 = 11;
const KIND_FUNC: u32 = 12;
const KIND_FUNC_PROTO: u32 = 13;
const KIND_VAR: u32 = 14;
const KIND_DATASEC: u32 = 15;
const KIND_FLOAT: u32 = 16;
const KIND_DECL_TAG: u32 = 17;
const KIND_TYPE_TAG: u32 = 18;
const KIND_ENUM64: u32 = 19;

#[derive(Debug, Clone, Copy)]
struct Member {
    name_off: u32,
    type_id: u32,
    bit_offset: u32,
    bitfield_size: u32,
}

#[derive(Debug, Clone)]
enum Kind {
    Int,
    Ptr,
    Array { elem_type: u32, nelems: u32 },
    Struct(Vec<Member>),
    Union(Vec<Member>),
    Enum(Vec<(u32, u64)>),
    /// typedef, volatile, const, restrict and type tags.
    Modifier,
    Other,
}

#[derive(Debug, Clone)]
struct BtfType {
    name_off: u32,
    size_or_type: u32,
    kind: Kind,
}

/// A member found along a path, relative to the outermost structure.
#[derive(Debug, Clone, Copy)]
struct Located {
    bit_offset: u32,
    bitfield_size: u32,
    type_id: u32,
}

/// Result of [`KernelBtf::resolve_layout`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayout {
    pub layout: KernelLayout,
    /// Layout fields the BTF did not describe.
    pub missing: Vec<&'static str>,
}

#[derive(Debug)]
pub struct KernelBtf {
    types: Vec<BtfType>,
    strings: Bytes,
}

fn btf_error(message: impl Into<String>) -> BindsnoopError {
    BindsnoopError::KernelBtf {
        message: message.into(),
    }
}

fn need(buf: &Bytes, len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(btf_error("Truncated BTF type section"));
    }
    Ok(())
}

fn skip(buf: &mut Bytes, len: usize) -> Result<()> {
    need(buf, len)?;
    buf.advance(len);
    Ok(())
}

fn section(data: &Bytes, hdr_len: usize, offset: usize, len: usize) -> Result<Bytes> {
    let start = hdr_len
        .checked_add(offset)
        .ok_or_else(|| btf_error("BTF section offset overflows"))?;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| btf_error("BTF section extends past end of data"))?;
    Ok(data.slice(start..end))
}

fn parse_types(mut buf: Bytes) -> Result<Vec<BtfType>> {
    // Type ids start at 1; id 0 is void.
    let mut types = vec![BtfType {
        name_off: 0,
        size_or_type: 0,
        kind: Kind::Other,
    }];

    while buf.has_remaining() {
        need(&buf, 12)?;
        let name_off = buf.get_u32_le();
        let info = buf.get_u32_le();
        let size_or_type = buf.get_u32_le();
        let vlen = (info & 0xffff) as usize;
        let kind_flag = info >> 31 == 1;

        let kind = match (info >> 24) & 0x1f {
            KIND_INT => {
                skip(&mut buf, 4)?;
                Kind::Int
            }
            KIND_PTR => Kind::Ptr,
            KIND_ARRAY => {
                need(&buf, 12)?;
                let elem_type = buf.get_u32_le();
                let _index_type = buf.get_u32_le();
                let nelems = buf.get_u32_le();
                Kind::Array { elem_type, nelems }
            }
            kind @ (KIND_STRUCT | KIND_UNION) => {
                need(&buf, vlen * 12)?;
                let members = (0..vlen)
                    .map(|_| {
                        let name_off = buf.get_u32_le();
                        let type_id = buf.get_u32_le();
                        let offset = buf.get_u32_le();
                        if kind_flag {
                            Member {
                                name_off,
                                type_id,
                                bit_offset: offset & 0x00ff_ffff,
                                bitfield_size: offset >> 24,
                            }
                        } else {
                            Member {
                                name_off,
                                type_id,
                                bit_offset: offset,
                                bitfield_size: 0,
                            }
                        }
                    })
                    .collect();
                if kind == KIND_STRUCT {
                    Kind::Struct(members)
                } else {
                    Kind::Union(members)
                }
            }
            KIND_ENUM => {
                need(&buf, vlen * 8)?;
                let values = (0..vlen)
                    .map(|_| {
                        let name_off = buf.get_u32_le();
                        let value = buf.get_i32_le() as i64 as u64;
                        (name_off, value)
                    })
                    .collect();
                Kind::Enum(values)
            }
            KIND_ENUM64 => {
                need(&buf, vlen * 12)?;
                let values = (0..vlen)
                    .map(|_| {
                        let name_off = buf.get_u32_le();
                        let lo = buf.get_u32_le() as u64;
                        let hi = buf.get_u32_le() as u64;
                        (name_off, (hi << 32) | lo)
                    })
                    .collect();
                Kind::Enum(values)
            }
            KIND_TYPEDEF | KIND_VOLATILE | KIND_CONST | KIND_RESTRICT | KIND_TYPE_TAG => {
                Kind::Modifier
            }
            KIND_FWD | KIND_FUNC | KIND_FLOAT => Kind::Other,
            KIND_FUNC_PROTO => {
                skip(&mut buf, vlen * 8)?;
                Kind::Other
            }
            KIND_VAR | KIND_DECL_TAG => {
                skip(&mut buf, 4)?;
                Kind::Other
            }
            KIND_DATASEC => {
                skip(&mut buf, vlen * 12)?;
                Kind::Other
            }
            other => return Err(btf_error(format!("Unknown BTF kind {other}"))),
        };

        types.push(BtfType {
            name_off,
            size_or_type,
            kind,
        });
    }

    Ok(types)
}

fn apply(
    name: &'static str,
    field: &mut FieldSpec,
    found: Option<FieldSpec>,
    missing: &mut Vec<&'static str>,
) {
    match found {
        Some(spec) => *field = spec,
        None => missing.push(name),
    }
}

impl KernelBtf {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| btf_error(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(Bytes::from(data))
    }

    pub fn parse(data: Bytes) -> Result<Self> {
        let mut header = data.clone();
        if header.remaining() < HEADER_LEN {
            return Err(btf_error("Truncated BTF header"));
        }
        let magic = header.get_u16_le();
        if magic != BTF_MAGIC {
            return Err(btf_error(format!("Unsupported BTF magic {magic:#06x}")));
        }
        let _version = header.get_u8();
        let _flags = header.get_u8();
        let hdr_len = header.get_u32_le() as usize;
        let type_off = header.get_u32_le() as usize;
        let type_len = header.get_u32_le() as usize;
        let str_off = header.get_u32_le() as usize;
        let str_len = header.get_u32_le() as usize;

        let types = section(&data, hdr_len, type_off, type_len)?;
        let strings = section(&data, hdr_len, str_off, str_len)?;

        Ok(Self {
            types: parse_types(types)?,
            strings,
        })
    }

    /// `base` with every field the BTF describes replaced by its offset.
    pub fn resolve_layout(&self, base: &KernelLayout) -> ResolvedLayout {
        let mut layout = *base;
        let mut missing = Vec::new();
        let m = &mut missing;

        apply("socket_sk", &mut layout.socket_sk, self.pointer("socket", "sk"), m);
        apply(
            "sport",
            &mut layout.sport,
            self.scalar("sock", "__sk_common.skc_num"),
            m,
        );
        apply(
            "saddr_v4",
            &mut layout.saddr_v4,
            self.address("sock", "__sk_common.skc_rcv_saddr", 32),
            m,
        );
        apply(
            "saddr_v6",
            &mut layout.saddr_v6,
            self.address("sock", "__sk_common.skc_v6_rcv_saddr", 128),
            m,
        );
        apply(
            "bound_dev_if",
            &mut layout.bound_dev_if,
            self.scalar("sock", "__sk_common.skc_bound_dev_if"),
            m,
        );
        apply("protocol", &mut layout.protocol, self.scalar("sock", "sk_protocol"), m);
        apply(
            "reuse",
            &mut layout.reuse,
            self.scalar("sock", "__sk_common.skc_reuse"),
            m,
        );
        apply(
            "reuseport",
            &mut layout.reuseport,
            self.scalar("sock", "__sk_common.skc_reuseport"),
            m,
        );
        apply(
            "freebind",
            &mut layout.freebind,
            self.inet_flag("freebind", "INET_FLAGS_FREEBIND"),
            m,
        );
        apply(
            "transparent",
            &mut layout.transparent,
            self.inet_flag("transparent", "INET_FLAGS_TRANSPARENT"),
            m,
        );
        apply(
            "bind_address_no_port",
            &mut layout.bind_address_no_port,
            self.inet_flag("bind_address_no_port", "INET_FLAGS_BIND_ADDRESS_NO_PORT"),
            m,
        );
        apply(
            "task_nsproxy",
            &mut layout.task_nsproxy,
            self.pointer("task_struct", "nsproxy"),
            m,
        );
        apply(
            "nsproxy_mnt_ns",
            &mut layout.nsproxy_mnt_ns,
            self.pointer("nsproxy", "mnt_ns"),
            m,
        );
        apply(
            "mnt_ns_inum",
            &mut layout.mnt_ns_inum,
            self.scalar("mnt_namespace", "ns.inum"),
            m,
        );

        ResolvedLayout { layout, missing }
    }

    fn name(&self, offset: u32) -> &str {
        let bytes = self.strings.get(offset as usize..).unwrap_or_default();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).unwrap_or("")
    }

    /// Strips typedefs and qualifiers.
    fn resolve(&self, mut id: u32) -> Option<&BtfType> {
        for _ in 0..MAX_TYPE_DEPTH {
            let ty = self.types.get(id as usize)?;
            match ty.kind {
                Kind::Modifier => id = ty.size_or_type,
                _ => return Some(ty),
            }
        }
        None
    }

    fn size_of(&self, id: u32, depth: usize) -> Option<u32> {
        if depth > MAX_TYPE_DEPTH {
            return None;
        }
        let ty = self.resolve(id)?;
        match &ty.kind {
            Kind::Int | Kind::Struct(_) | Kind::Union(_) | Kind::Enum(_) => Some(ty.size_or_type),
            Kind::Ptr => Some(8),
            Kind::Array { elem_type, nelems } => {
                self.size_of(*elem_type, depth + 1)?.checked_mul(*nelems)
            }
            Kind::Modifier | Kind::Other => None,
        }
    }

    fn struct_named(&self, name: &str) -> Option<u32> {
        self.types
            .iter()
            .position(|ty| {
                matches!(&ty.kind, Kind::Struct(members) if !members.is_empty())
                    && self.name(ty.name_off) == name
            })
            .map(|id| id as u32)
    }

    fn members(&self, id: u32) -> Option<&[Member]> {
        match &self.resolve(id)?.kind {
            Kind::Struct(members) | Kind::Union(members) => Some(members),
            _ => None,
        }
    }

    /// Finds `name` in the structure or union `id`, looking through
    /// anonymous members.
    fn find_member(&self, id: u32, name: &str, depth: usize) -> Option<Located> {
        if depth > MAX_TYPE_DEPTH {
            return None;
        }
        for member in self.members(id)? {
            if member.name_off != 0 {
                if self.name(member.name_off) == name {
                    return Some(Located {
                        bit_offset: member.bit_offset,
                        bitfield_size: member.bitfield_size,
                        type_id: member.type_id,
                    });
                }
            } else if let Some(inner) = self.find_member(member.type_id, name, depth + 1) {
                return Some(Located {
                    bit_offset: member.bit_offset.checked_add(inner.bit_offset)?,
                    ..inner
                });
            }
        }
        None
    }

    /// Follows a dotted member path from `struct <root>`.
    fn locate(&self, root: &str, path: &str) -> Option<Located> {
        let root = self.struct_named(root)?;
        let mut located: Option<Located> = None;
        for component in path.split('.') {
            let container = located.map_or(root, |l| l.type_id);
            let base = located.map_or(0, |l| l.bit_offset);
            let member = self.find_member(container, component, 0)?;
            located = Some(Located {
                bit_offset: base.checked_add(member.bit_offset)?,
                ..member
            });
        }
        located
    }

    fn pointer(&self, root: &str, path: &str) -> Option<FieldSpec> {
        let located = self.locate(root, path)?;
        let is_pointer = matches!(self.resolve(located.type_id)?.kind, Kind::Ptr);
        (is_pointer && located.bitfield_size == 0 && located.bit_offset % 8 == 0)
            .then(|| FieldSpec::pointer(located.bit_offset / 8))
    }

    fn scalar(&self, root: &str, path: &str) -> Option<FieldSpec> {
        let located = self.locate(root, path)?;
        if located.bitfield_size > 0 {
            let shift = located.bit_offset % 8;
            if shift + located.bitfield_size > 32 {
                return None;
            }
            return Some(FieldSpec::bitfield(
                located.bit_offset / 8,
                shift as u8,
                located.bitfield_size as u8,
            ));
        }
        let bits = self.size_of(located.type_id, 0)?.checked_mul(8)?;
        (located.bit_offset % 8 == 0 && matches!(bits, 8 | 16 | 32))
            .then(|| FieldSpec::scalar(located.bit_offset / 8, bits as u8))
    }

    fn address(&self, root: &str, path: &str, bits: u32) -> Option<FieldSpec> {
        let located = self.locate(root, path)?;
        let size = self.size_of(located.type_id, 0)?.checked_mul(8)?;
        (located.bitfield_size == 0 && located.bit_offset % 8 == 0 && size == bits)
            .then(|| FieldSpec::scalar(located.bit_offset / 8, bits as u8))
    }

    /// `inet_sock` option bit: a bitfield on older kernels, a bit of
    /// `inet_flags` numbered by an `INET_FLAGS_*` constant on newer ones.
    fn inet_flag(&self, member: &str, constant: &str) -> Option<FieldSpec> {
        self.scalar("inet_sock", member).or_else(|| {
            let flags = self.locate("inet_sock", "inet_flags")?;
            let bit = u32::try_from(self.enum_value(constant)?).ok()?;
            let bit_offset = flags.bit_offset.checked_add(bit)?;
            Some(FieldSpec::bitfield(bit_offset / 8, (bit_offset % 8) as u8, 1))
        })
    }

    fn enum_value(&self, name: &str) -> Option<u64> {
        self.types.iter().find_map(|ty| match &ty.kind {
            Kind::Enum(values) => values
                .iter()
                .find(|(name_off, _)| self.name(*name_off) == name)
                .map(|(_, value)| *value),
            _ => None,
        })
    }
}
