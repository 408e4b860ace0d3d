use std::io::{self, Cursor, Read};

fn ensure_remaining(cursor: &Cursor<&[u8]>, needed: usize, what: &str) -> io::Result<()> {
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if remaining < needed as u64 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "End of buffer reached or not enough bytes for {} (position {}, buffer length {})",
                what,
                cursor.position(),
                cursor.get_ref().len()
            ),
        ));
    }
    Ok(())
}

pub fn read_u8(cursor: &mut Cursor<&[u8]>) -> io::Result<u8> {
    let [byte] = read_array::<1>(cursor)?;
    Ok(byte)
}

pub fn read_u32_le(cursor: &mut Cursor<&[u8]>) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_array::<4>(cursor)?))
}

pub fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> io::Result<[u8; N]> {
    ensure_remaining(cursor, N, &format!("{}-byte field", N))?;

    let mut buf = [0u8; N];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}
