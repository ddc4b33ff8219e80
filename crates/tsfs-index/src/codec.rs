//! LMDB key and value codecs.
//!
//! Keys are `path 0x00 name`. Neither part may contain NUL, so byte order
//! of the encoding equals `(path, name)` order of [`FsId`].
//!
//! Values carry an explicit tag byte:
//!
//! ```text
//! tag=0  committed:u8
//! tag=1  committed:u8 data_file:u32be data_lane:u8 meta_file:u32be meta_lane:u8
//! ```

use std::borrow::Cow;

use heed::{BoxedError, BytesDecode, BytesEncode};
use tsfs_shard::FsId;

use crate::{IndexError, LaneRef, LocationRecord};

const TAG_RESERVED: u8 = 0;
const TAG_LANES: u8 = 1;
const LANES_LEN: usize = 12;

pub struct FsIdCodec;

impl<'a> BytesEncode<'a> for FsIdCodec {
    type EItem = FsId;

    fn bytes_encode(id: &'a FsId) -> Result<Cow<'a, [u8]>, BoxedError> {
        let mut key = Vec::with_capacity(id.path().len() + 1 + id.name().len());
        key.extend_from_slice(id.path().as_bytes());
        key.push(0);
        key.extend_from_slice(id.name().as_bytes());
        Ok(Cow::Owned(key))
    }
}

impl<'a> BytesDecode<'a> for FsIdCodec {
    type DItem = FsId;

    fn bytes_decode(bytes: &'a [u8]) -> Result<FsId, BoxedError> {
        let split = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| IndexError::Corrupted("key without separator".into()))?;
        let path = std::str::from_utf8(&bytes[..split])?;
        let name = std::str::from_utf8(&bytes[split + 1..])?;
        Ok(FsId::new(path, name)?)
    }
}

pub struct RecordCodec;

impl<'a> BytesEncode<'a> for RecordCodec {
    type EItem = LocationRecord;

    fn bytes_encode(record: &'a LocationRecord) -> Result<Cow<'a, [u8]>, BoxedError> {
        let mut out = Vec::with_capacity(LANES_LEN);
        match *record {
            LocationRecord::Reserved { committed } => {
                out.push(TAG_RESERVED);
                out.push(u8::from(committed));
            }
            LocationRecord::Lanes {
                committed,
                data,
                meta,
            } => {
                out.push(TAG_LANES);
                out.push(u8::from(committed));
                out.extend_from_slice(&data.file_id.to_be_bytes());
                out.push(data.lane);
                out.extend_from_slice(&meta.file_id.to_be_bytes());
                out.push(meta.lane);
            }
        }
        Ok(Cow::Owned(out))
    }
}

impl<'a> BytesDecode<'a> for RecordCodec {
    type DItem = LocationRecord;

    fn bytes_decode(bytes: &'a [u8]) -> Result<LocationRecord, BoxedError> {
        let corrupted = |what: &str| IndexError::Corrupted(format!("{} record", what));
        let (&tag, rest) = bytes.split_first().ok_or_else(|| corrupted("empty"))?;
        let committed = match rest.first() {
            Some(0) => false,
            Some(1) => true,
            _ => return Err(corrupted("bad committed flag in").into()),
        };
        match tag {
            TAG_RESERVED if bytes.len() == 2 => Ok(LocationRecord::Reserved { committed }),
            TAG_LANES if bytes.len() == LANES_LEN => {
                let u32_at = |i: usize| {
                    u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
                };
                Ok(LocationRecord::Lanes {
                    committed,
                    data: LaneRef::new(u32_at(2), bytes[6]),
                    meta: LaneRef::new(u32_at(7), bytes[11]),
                })
            }
            TAG_RESERVED | TAG_LANES => Err(corrupted("truncated").into()),
            _ => Err(corrupted("unknown tag in").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_key(id: &FsId) -> Vec<u8> {
        FsIdCodec::bytes_encode(id).unwrap().into_owned()
    }

    #[test]
    fn test_key_order_matches_id_order() {
        let mut ids: Vec<FsId> = ["/a/z", "/a/b/a", "/a/zz", "/ab/a", "/b"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let mut by_key = ids.clone();
        ids.sort();
        by_key.sort_by_key(encode_key);
        assert_eq!(ids, by_key);
    }

    #[test]
    fn test_key_decode() {
        let id: FsId = "/pa/pdc/kic9".parse().unwrap();
        let key = encode_key(&id);
        assert_eq!(FsIdCodec::bytes_decode(&key).unwrap(), id);
        assert!(FsIdCodec::bytes_decode(b"/pa").is_err());
    }

    #[test]
    fn test_record_layout() {
        let rec = LocationRecord::Lanes {
            committed: true,
            data: LaneRef::new(0x01020304, 7),
            meta: LaneRef::new(9, 63),
        };
        let bytes = RecordCodec::bytes_encode(&rec).unwrap();
        assert_eq!(&bytes[..], &[1, 1, 1, 2, 3, 4, 7, 0, 0, 0, 9, 63]);
        assert_eq!(RecordCodec::bytes_decode(&bytes).unwrap(), rec);

        let reserved = LocationRecord::Reserved { committed: false };
        let bytes = RecordCodec::bytes_encode(&reserved).unwrap();
        assert_eq!(&bytes[..], &[0, 0]);
        assert_eq!(RecordCodec::bytes_decode(&bytes).unwrap(), reserved);
    }

    #[test]
    fn test_record_rejects_garbage() {
        assert!(RecordCodec::bytes_decode(&[]).is_err());
        assert!(RecordCodec::bytes_decode(&[1, 1, 0]).is_err());
        assert!(RecordCodec::bytes_decode(&[9, 0]).is_err());
        assert!(RecordCodec::bytes_decode(&[0, 5]).is_err());
    }
}
