//! 세그먼트 와이어 포맷
//!
//! 모든 데이터그램은 고정 24바이트 헤더 + 페이로드 구조의 [`Segment`]다.
//! 멀티바이트 필드는 전부 빅엔디안.
//!
//! ```text
//! seq:u32 | ack:u32 | timestamp:u64 | length‖flags:u32 | reserved:u16 | checksum:u16 | payload
//! ```
//!
//! `length` 필드 하위 3비트가 플래그(ACK=bit0, FIN=bit1, SYN=bit2),
//! 페이로드 길이는 `length >> 3`. 체크섬은 RFC 1071 인터넷 체크섬
//! (16비트 1의 보수 합, 자리올림 즉시 반영).

use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::{Error, Result};

/// 헤더 크기 (바이트, 고정)
pub const HEADER_SIZE: usize = 24;

// 헤더 내 필드 오프셋
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_TIMESTAMP: usize = 8;
const OFF_LENGTH: usize = 16;
const OFF_RESERVED: usize = 20;
const OFF_CHECKSUM: usize = 22;

/// 헤더 플래그 (length 필드 하위 3비트)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SegFlag {
    /// 연결 수립
    Syn = 0b100,

    /// 연결 종료
    Fin = 0b010,

    /// 누적 확인 응답
    Ack = 0b001,
}

impl SegFlag {
    /// length 필드에서의 비트 마스크
    pub fn mask(self) -> u32 {
        self as u32
    }
}

/// 와이어 세그먼트
///
/// `timestamp`는 encode가 덮어쓰지 않는다. 송신 경로가 전송 직전
/// [`now_nanos`]로 찍고, ACK 경로는 확인 대상 세그먼트의 값을 그대로
/// 에코해서 송신자가 RTT를 계산할 수 있게 한다.
#[derive(Debug, Clone)]
pub struct Segment {
    /// 페이로드 첫 바이트의 오프셋 (SYN이면 핸드쉐이크 논스)
    pub seq: u32,

    /// 다음 기대 바이트 오프셋 (누적 ACK)
    pub ack: u32,

    /// 송신 시각 (나노초) 또는 에코된 피어 타임스탬프
    pub timestamp: u64,

    /// 페이로드 길이(<<3) + 플래그 비트
    length: u32,

    /// 페이로드 (0 .. MTU-24 바이트)
    pub payload: Bytes,
}

impl Segment {
    /// 빈 세그먼트 생성 (플래그 없음, 페이로드 없음)
    pub fn new(seq: u32, ack: u32) -> Self {
        Self {
            seq,
            ack,
            timestamp: 0,
            length: 0,
            payload: Bytes::new(),
        }
    }

    /// 플래그 설정/해제
    pub fn set_flag(&mut self, flag: SegFlag, on: bool) {
        if on {
            self.length |= flag.mask();
        } else {
            self.length &= !flag.mask();
        }
    }

    pub fn is_syn(&self) -> bool {
        self.length & SegFlag::Syn.mask() != 0
    }

    pub fn is_fin(&self) -> bool {
        self.length & SegFlag::Fin.mask() != 0
    }

    pub fn is_ack(&self) -> bool {
        self.length & SegFlag::Ack.mask() != 0
    }

    /// 페이로드 설정 (length 필드 상위 비트에 길이 반영, 플래그 유지)
    pub fn set_payload(&mut self, payload: Bytes) {
        self.length = (self.length & 0b111) | ((payload.len() as u32) << 3);
        self.payload = payload;
    }

    /// length 필드에 기록된 페이로드 길이
    pub fn payload_len(&self) -> usize {
        (self.length >> 3) as usize
    }

    /// 세그먼트를 와이어 바이트로 직렬화
    ///
    /// 체크섬 필드를 0으로 두고 전체 버퍼의 체크섬을 계산한 뒤 채운다.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::zeroed(HEADER_SIZE + self.payload.len());

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[OFF_LENGTH..OFF_LENGTH + 4].copy_from_slice(&self.length.to_be_bytes());
        buf[OFF_RESERVED..OFF_RESERVED + 2].copy_from_slice(&0u16.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
        buf[HEADER_SIZE..].copy_from_slice(&self.payload);

        let checksum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&checksum.to_be_bytes());

        buf.freeze()
    }

    /// 와이어 바이트에서 세그먼트 역직렬화
    ///
    /// 체크섬은 검증하지 않는다 ([`Segment::checksum_ok`] 별도 호출).
    /// 버퍼가 헤더 + 선언된 페이로드 길이보다 짧으면 실패한다.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::LengthMismatch {
                declared: HEADER_SIZE,
                got: buf.len(),
            });
        }

        let seq = u32::from_be_bytes(buf[OFF_SEQ..OFF_SEQ + 4].try_into().unwrap());
        let ack = u32::from_be_bytes(buf[OFF_ACK..OFF_ACK + 4].try_into().unwrap());
        let timestamp =
            u64::from_be_bytes(buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 8].try_into().unwrap());
        let length = u32::from_be_bytes(buf[OFF_LENGTH..OFF_LENGTH + 4].try_into().unwrap());

        let payload_len = (length >> 3) as usize;
        if buf.len() < HEADER_SIZE + payload_len {
            return Err(Error::LengthMismatch {
                declared: HEADER_SIZE + payload_len,
                got: buf.len(),
            });
        }

        Ok(Self {
            seq,
            ack,
            timestamp,
            length,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..HEADER_SIZE + payload_len]),
        })
    }

    /// 수신 데이터그램의 체크섬 검증
    ///
    /// 체크섬 필드를 0으로 놓고 재계산한 값이 헤더에 실린 값과 같아야
    /// 통과. 불일치 세그먼트는 수신된 적 없는 것으로 취급된다 (ACK 없음).
    pub fn checksum_ok(buf: &[u8]) -> bool {
        if buf.len() < HEADER_SIZE {
            return false;
        }

        let carried =
            u16::from_be_bytes(buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].try_into().unwrap());

        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());

        internet_checksum(&scratch) == carried
    }

    /// 로그용 플래그 문자 (S/A/F/D, 비활성은 '-')
    fn flag_chars(&self) -> (char, char, char, char) {
        (
            if self.is_syn() { 'S' } else { '-' },
            if self.is_ack() { 'A' } else { '-' },
            if self.is_fin() { 'F' } else { '-' },
            if !self.payload.is_empty() { 'D' } else { '-' },
        )
    }
}

/// RFC 1071 인터넷 체크섬
///
/// 16비트 워드를 1의 보수 덧셈(자리올림은 즉시 bit 0으로 반영)으로
/// 누적하고 최종 합의 1의 보수를 반환. 홀수 길이면 마지막 바이트 뒤를
/// 0으로 패딩한다. 호출자는 버퍼 내 체크섬 필드를 미리 0으로 둘 것.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + 1;
        }
    }

    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + 1;
        }
    }

    !(sum as u16)
}

/// 현재 시각 (UNIX epoch 기준 나노초)
pub fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// 세그먼트 송수신 로그 한 줄 출력
///
/// `snd 12.34 S A - D 1024 1000 1` 형식 (방향, 연결 수립 후 경과 ms,
/// 플래그 문자, 시퀀스, 페이로드 길이, ACK).
pub fn log_segment(dir: &str, start: Instant, seg: &Segment) {
    let (s, a, f, d) = seg.flag_chars();
    println!(
        "{} {:.2} {} {} {} {} {} {} {}",
        dir,
        start.elapsed().as_secs_f64() * 1e3,
        s,
        a,
        f,
        d,
        seg.seq,
        seg.payload.len(),
        seg.ack,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_segment(seq: u32, ack: u32, payload: &[u8]) -> Segment {
        let mut seg = Segment::new(seq, ack);
        seg.set_payload(Bytes::copy_from_slice(payload));
        seg
    }

    #[test]
    fn test_roundtrip() {
        let mut seg = data_segment(4096, 1, b"hello tcpend");
        seg.set_flag(SegFlag::Ack, true);
        seg.timestamp = now_nanos();

        let buf = seg.encode();
        let restored = Segment::decode(&buf).unwrap();

        assert_eq!(restored.seq, 4096);
        assert_eq!(restored.ack, 1);
        assert_eq!(restored.timestamp, seg.timestamp);
        assert!(restored.is_ack());
        assert!(!restored.is_syn());
        assert!(!restored.is_fin());
        assert_eq!(restored.payload.as_ref(), b"hello tcpend");
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let mut seg = Segment::new(0, 0);
        seg.set_flag(SegFlag::Syn, true);

        let buf = seg.encode();
        assert_eq!(buf.len(), HEADER_SIZE);

        let restored = Segment::decode(&buf).unwrap();
        assert!(restored.is_syn());
        assert_eq!(restored.payload_len(), 0);
        assert!(restored.payload.is_empty());
    }

    #[test]
    fn test_fresh_segment_validates() {
        let seg = data_segment(0, 0, &[0xAB; 100]);
        assert!(Segment::checksum_ok(&seg.encode()));
    }

    #[test]
    fn test_any_single_bit_flip_fails_checksum() {
        let buf = data_segment(7, 3, b"integrity").encode();

        for bit in 0..buf.len() * 8 {
            let mut corrupted = buf.to_vec();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            assert!(
                !Segment::checksum_ok(&corrupted),
                "bit {} flip not detected",
                bit
            );
        }
    }

    #[test]
    fn test_decode_short_header() {
        assert!(matches!(
            Segment::decode(&[0u8; HEADER_SIZE - 1]),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let buf = data_segment(0, 0, b"abcd").encode();
        // length 필드는 4바이트를 선언하지만 버퍼는 한 바이트 모자람
        assert!(matches!(
            Segment::decode(&buf[..buf.len() - 1]),
            Err(Error::LengthMismatch { declared, got }) if declared == HEADER_SIZE + 4 && got == HEADER_SIZE + 3
        ));
    }

    #[test]
    fn test_length_field_packing() {
        let mut seg = Segment::new(0, 0);
        seg.set_flag(SegFlag::Fin, true);
        seg.set_flag(SegFlag::Ack, true);
        seg.set_payload(Bytes::from_static(&[0u8; 1000]));

        // 플래그는 하위 3비트, 길이는 상위 비트에 유지
        assert!(seg.is_fin());
        assert!(seg.is_ack());
        assert!(!seg.is_syn());
        assert_eq!(seg.payload_len(), 1000);

        seg.set_flag(SegFlag::Fin, false);
        assert!(!seg.is_fin());
        assert_eq!(seg.payload_len(), 1000);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut seg = Segment::new(0x0102_0304, 0x0506_0708);
        seg.timestamp = 0x1112_1314_1516_1718;
        let buf = seg.encode();

        assert_eq!(&buf[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[4..8], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(
            &buf[8..16],
            &[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]
        );
        // 예약 필드는 항상 0
        assert_eq!(&buf[20..22], &[0, 0]);
    }

    #[test]
    fn test_checksum_odd_length() {
        // 홀수 길이 입력은 0으로 패딩되어 계산된다
        let odd = internet_checksum(&[0x01, 0x02, 0x03]);
        let padded = internet_checksum(&[0x01, 0x02, 0x03, 0x00]);
        assert_eq!(odd, padded);
    }

    #[test]
    fn test_checksum_end_around_carry() {
        // 0xFFFF + 0x0001 = 0x10000 -> 자리올림 반영 -> 0x0001, 보수 = 0xFFFE
        let sum = internet_checksum(&[0xFF, 0xFF, 0x00, 0x01]);
        assert_eq!(sum, 0xFFFE);
    }
}
