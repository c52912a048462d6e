//! End-to-end decompression: hand-assembled 68K `dcmp` guests run through
//! the shim with real activation frames, for both header versions.

use std::collections::HashMap;

use rezemu::decompress::{
    decompress_resource, CompressedResourceHeader, DecompressEnv, DecompressFlags, Resource,
    ResourceSource, FLAG_COMPRESSED, FLAG_DECOMPRESSED, FLAG_DECOMPRESSION_FAILED,
    RESOURCE_TYPE_DCMP,
};

struct MapSource(HashMap<(u32, i16), Resource>);

impl MapSource {
    fn with_dcmp(id: i16, code: Vec<u8>) -> Self {
        let mut map = HashMap::new();
        map.insert(
            (RESOURCE_TYPE_DCMP, id),
            Resource::new(RESOURCE_TYPE_DCMP, id, code),
        );
        Self(map)
    }
}

impl ResourceSource for MapSource {
    fn get_resource(&self, rtype: u32, id: i16) -> Option<Resource> {
        self.0.get(&(rtype, id)).cloned()
    }
}

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for w in words {
        bytes.extend_from_slice(&w.to_be_bytes());
    }
    bytes
}

/// A v9 copy "decompressor" in the tagged format: `'dcmp'` at bytes 4..8,
/// execution from byte 0. Reads the decompressed size out of the resource
/// header the v9 frame points at, then copies that many bytes to the output.
fn v9_copy_dcmp() -> Vec<u8> {
    words_to_bytes(&[
        0x6006, // bra.s past the tag
        0x0000, //
        0x6463, 0x6D70, // 'dcmp'
        0x206F, 0x0004, // movea.l 0x4(a7), a0   ; resource header
        0x2028, 0x0008, // move.l 0x8(a0), d0    ; decompressed size
        0x226F, 0x0008, // movea.l 0x8(a7), a1   ; destination
        0x246F, 0x000C, // movea.l 0xC(a7), a2   ; source
        0x4A80, // tst.l d0
        0x6706, // beq.s done
        0x12DA, // move.b (a2)+, (a1)+
        0x5380, // subq.l #1, d0
        0x60F6, // bra.s back to the tst
        0x4E75, // rts (into the frame's RESET thunk)
    ])
}

/// The same copy loop in the offset-table format: three leading offset
/// words, entry offset 6 in word 1. The v8 frame carries no header pointer,
/// so the size is read relative to the source buffer (header - 18 + 8).
fn v8_copy_dcmp() -> Vec<u8> {
    words_to_bytes(&[
        0x0000, 0x0006, 0x0000, // offset table; entry at byte 6
        0x226F, 0x000C, // movea.l 0xC(a7), a1   ; destination
        0x246F, 0x0010, // movea.l 0x10(a7), a2  ; source
        0x202A, 0xFFF6, // move.l -0xA(a2), d0   ; decompressed size
        0x4A80, // tst.l d0
        0x6706, // beq.s done
        0x12DA, // move.b (a2)+, (a1)+
        0x5380, // subq.l #1, d0
        0x60F6, // bra.s back to the tst
        0x4E75, // rts
    ])
}

fn compressed_resource(version: u16, id: i16, payload: &[u8]) -> Resource {
    let header = CompressedResourceHeader {
        magic: CompressedResourceHeader::MAGIC,
        header_version: version,
        attributes: 1,
        decompressed_size: payload.len() as u32,
        dcmp_resource_id: id,
        output_extra_bytes: 0,
        working_buffer_fractional_size: if version == 8 { 16 } else { 0 },
        expansion_buffer_size: 0,
    };
    let mut data = header.to_bytes().to_vec();
    data.extend_from_slice(payload);
    let mut res = Resource::new(0x54455354, 128, data);
    res.flags = FLAG_COMPRESSED;
    res
}

fn file_only_flags() -> DecompressFlags {
    DecompressFlags::default()
        .with(DecompressFlags::SKIP_SYSTEM_DCMP)
        .with(DecompressFlags::SKIP_SYSTEM_NCMP)
}

#[test]
fn v9_guest_decompresses_through_the_frame() {
    let payload = b"The quick brown fox jumps over the lazy dog.";
    let source = MapSource::with_dcmp(2, v9_copy_dcmp());
    let env = DecompressEnv::new().with_source(&source);

    let mut res = compressed_resource(9, 2, payload);
    decompress_resource(&mut res, file_only_flags(), &env).unwrap();

    assert_eq!(res.data, payload);
    assert_eq!(res.flags & FLAG_COMPRESSED, 0);
    assert_ne!(res.flags & FLAG_DECOMPRESSED, 0);
}

#[test]
fn v8_guest_decompresses_through_the_frame() {
    let payload = b"eight-byte header, classic frame";
    let source = MapSource::with_dcmp(1, v8_copy_dcmp());
    let env = DecompressEnv::new().with_source(&source);

    let mut res = compressed_resource(8, 1, payload);
    decompress_resource(&mut res, file_only_flags(), &env).unwrap();

    assert_eq!(res.data, payload);
    assert_ne!(res.flags & FLAG_DECOMPRESSED, 0);
}

#[test]
fn decompression_is_idempotent_across_runs() {
    let payload = b"same input, same decompressor, same bytes";
    let source = MapSource::with_dcmp(2, v9_copy_dcmp());
    let env = DecompressEnv::new().with_source(&source);

    let mut first = compressed_resource(9, 2, payload);
    let mut second = compressed_resource(9, 2, payload);
    decompress_resource(&mut first, file_only_flags(), &env).unwrap();
    decompress_resource(&mut second, file_only_flags(), &env).unwrap();
    assert_eq!(first.data, second.data);
}

#[test]
fn broken_file_dcmp_falls_back_to_builtin() {
    fn passthrough(
        header: &CompressedResourceHeader,
        payload: &[u8],
    ) -> Result<Vec<u8>, String> {
        Ok(payload[..header.decompressed_size as usize].to_vec())
    }

    // The file's dcmp is too short to even hold an entry point; the builtin
    // for the same id is next in priority and must win.
    let source = MapSource::with_dcmp(2, vec![0u8; 4]);
    let env = DecompressEnv::new()
        .with_source(&source)
        .with_builtin(2, passthrough);

    let payload = b"fallback";
    let mut res = compressed_resource(9, 2, payload);
    decompress_resource(&mut res, file_only_flags(), &env).unwrap();
    assert_eq!(res.data, payload);
}

#[test]
fn exhausted_candidates_mark_the_resource_failed() {
    let source = MapSource::with_dcmp(2, vec![0u8; 4]);
    let env = DecompressEnv::new().with_source(&source);

    let payload = b"nope";
    let mut res = compressed_resource(9, 2, payload);
    let err = decompress_resource(&mut res, file_only_flags(), &env).unwrap_err();
    assert!(err.to_string().contains("all decompressors failed"));
    assert_ne!(res.flags & FLAG_DECOMPRESSION_FAILED, 0);

    // Without RETRY a marked resource is left alone.
    let before = res.data.clone();
    decompress_resource(&mut res, file_only_flags(), &env).unwrap();
    assert_eq!(res.data, before);

    // With RETRY the attempt happens (and fails) again.
    let retry = file_only_flags().with(DecompressFlags::RETRY);
    assert!(decompress_resource(&mut res, retry, &env).is_err());
}

#[test]
fn entry_offset_formats_both_run() {
    // The tagged format starts at 0; the offset-table format starts at the
    // address named by word 1. Both copy loops produce the same output.
    let payload = b"entry offset heuristics";
    let tagged = MapSource::with_dcmp(2, v9_copy_dcmp());
    let env = DecompressEnv::new().with_source(&tagged);
    let mut a = compressed_resource(9, 2, payload);
    decompress_resource(&mut a, file_only_flags(), &env).unwrap();

    // Same guest logic wrapped in the offset-table preamble, reading the v9
    // frame (args are identical; only the entry-point discovery differs).
    let mut offset_form = words_to_bytes(&[0x0000, 0x0008, 0x0000, 0x0000]);
    offset_form.extend_from_slice(&words_to_bytes(&[
        0x206F, 0x0004, // movea.l 0x4(a7), a0
        0x2028, 0x0008, // move.l 0x8(a0), d0
        0x226F, 0x0008, // movea.l 0x8(a7), a1
        0x246F, 0x000C, // movea.l 0xC(a7), a2
        0x4A80, // tst.l d0
        0x6706, // beq.s done
        0x12DA, // move.b (a2)+, (a1)+
        0x5380, // subq.l #1, d0
        0x60F6, // bra.s back
        0x4E75, // rts
    ]));
    let offset_source = MapSource::with_dcmp(2, offset_form);
    let env = DecompressEnv::new().with_source(&offset_source);
    let mut b = compressed_resource(9, 2, payload);
    decompress_resource(&mut b, file_only_flags(), &env).unwrap();

    assert_eq!(a.data, b.data);
    assert_eq!(a.data, payload);
}
