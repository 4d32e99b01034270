use crate::types::HalArg;

/// Concatenates kernel arguments into one buffer, 8-byte aligning the
/// result (`hal::util::hal_argpack_t` / the original's `alignBuffer`
/// helper). Address arguments are written as their raw device address;
/// this port has no separate relocation table since kernels decode their
/// own argument layout directly rather than through a compiler-generated
/// descriptor.
pub fn pack_args(args: &[HalArg]) -> Vec<u8> {
    let mut buf = Vec::new();
    for arg in args {
        match arg {
            HalArg::Value(bytes) => buf.extend_from_slice(bytes),
            HalArg::Address(addr) => buf.extend_from_slice(&addr.to_le_bytes()),
        }
    }
    align_to(&mut buf, 8);
    buf
}

pub fn align_to(buf: &mut Vec<u8>, align: usize) {
    let aligned = (buf.len() + align - 1) / align * align;
    buf.resize(aligned, 0);
}
