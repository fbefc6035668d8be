use strata_x86::OperandSize;

use crate::fault::Fault;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Linear-address memory and port I/O as seen by the CPU core.
///
/// Multi-byte accesses are little-endian and may cross page boundaries; the
/// default implementations split them into byte accesses. Buses with holes
/// override the wide writes so a faulting store changes nothing.
pub trait CpuBus {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault>;
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), Fault>;

    fn read_u16(&mut self, addr: u32) -> Result<u16, Fault> {
        let lo = self.read_u8(addr)? as u16;
        let hi = self.read_u8(addr.wrapping_add(1))? as u16;
        Ok(lo | (hi << 8))
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32, Fault> {
        let lo = self.read_u16(addr)? as u32;
        let hi = self.read_u16(addr.wrapping_add(2))? as u32;
        Ok(lo | (hi << 16))
    }

    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), Fault> {
        self.write_u8(addr, val as u8)?;
        self.write_u8(addr.wrapping_add(1), (val >> 8) as u8)
    }

    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), Fault> {
        self.write_u16(addr, val as u16)?;
        self.write_u16(addr.wrapping_add(2), (val >> 16) as u16)
    }

    fn read_sized(&mut self, addr: u32, size: OperandSize) -> Result<u32, Fault> {
        match size {
            OperandSize::Byte => self.read_u8(addr).map(u32::from),
            OperandSize::Word => self.read_u16(addr).map(u32::from),
            OperandSize::Dword => self.read_u32(addr),
        }
    }

    fn write_sized(&mut self, addr: u32, size: OperandSize, val: u32) -> Result<(), Fault> {
        match size {
            OperandSize::Byte => self.write_u8(addr, val as u8),
            OperandSize::Word => self.write_u16(addr, val as u16),
            OperandSize::Dword => self.write_u32(addr, val),
        }
    }

    /// Fill `buf` with code bytes starting at `addr`.
    ///
    /// Returns how many bytes were available; fetching stops at the first
    /// byte the bus cannot supply.
    fn fetch(&mut self, addr: u32, buf: &mut [u8]) -> usize {
        for (i, slot) in buf.iter_mut().enumerate() {
            match self.read_u8(addr.wrapping_add(i as u32)) {
                Ok(b) => *slot = b,
                Err(_) => return i,
            }
        }
        buf.len()
    }

    /// Read `size` bytes from an I/O port. Unclaimed ports float high.
    fn io_read(&mut self, _port: u16, size: OperandSize) -> Result<u32, Fault> {
        Ok(size.mask())
    }

    fn io_write(&mut self, _port: u16, _size: OperandSize, _val: u32) -> Result<(), Fault> {
        Ok(())
    }

    /// Version counter of the 4 KiB page `page` (linear address >> 12).
    ///
    /// Buses that can observe writes bump this whenever the page changes so
    /// that cached code blocks decoded from it are detected as stale.
    fn code_page_version(&self, _page: u32) -> u32 {
        0
    }
}

/// Port `0xE9` debug console: bytes written there are collected in
/// [`PhysicalMemory::debug_output`].
pub const DEBUG_PORT: u16 = 0xE9;

/// Flat RAM with per-page write versions, identity-mapped at linear address 0.
#[derive(Debug, Clone)]
pub struct PhysicalMemory {
    ram: Vec<u8>,
    page_versions: Vec<u32>,
    debug_out: Vec<u8>,
}

impl PhysicalMemory {
    pub fn new(size: usize) -> Self {
        let pages = size.div_ceil(PAGE_SIZE);
        Self {
            ram: vec![0; size],
            page_versions: vec![0; pages],
            debug_out: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ram.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.ram
    }

    /// Copy `data` into RAM at `addr`, bumping the version of every touched page.
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<(), Fault> {
        let start = addr as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= self.ram.len())
            .ok_or(Fault::MemoryViolation { addr })?;
        self.ram[start..end].copy_from_slice(data);
        if !data.is_empty() {
            for page in (start >> PAGE_SHIFT)..=((end - 1) >> PAGE_SHIFT) {
                self.bump(page);
            }
        }
        Ok(())
    }

    pub fn slice(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let start = addr as usize;
        self.ram.get(start..start.checked_add(len)?)
    }

    /// Contents of 4 KiB page `page`; a trailing partial page is returned short.
    pub fn page(&self, page: u32) -> Option<&[u8]> {
        let start = (page as usize).checked_mul(PAGE_SIZE)?;
        if start >= self.ram.len() {
            return None;
        }
        let end = (start + PAGE_SIZE).min(self.ram.len());
        Some(&self.ram[start..end])
    }

    pub fn debug_output(&self) -> &[u8] {
        &self.debug_out
    }

    /// Store `bytes` at `addr` only if every byte is backed by RAM. The fault
    /// names the first unbacked address.
    fn write_all(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Fault> {
        let start = addr as usize;
        let end = match start.checked_add(bytes.len()) {
            Some(end) if end <= self.ram.len() => end,
            _ => {
                let backed = self.ram.len().saturating_sub(start);
                return Err(Fault::MemoryViolation {
                    addr: addr.wrapping_add(backed as u32),
                });
            }
        };
        self.ram[start..end].copy_from_slice(bytes);
        let (first, last) = (start >> PAGE_SHIFT, (end - 1) >> PAGE_SHIFT);
        self.bump(first);
        if last != first {
            self.bump(last);
        }
        Ok(())
    }

    fn bump(&mut self, page: usize) {
        if let Some(v) = self.page_versions.get_mut(page) {
            *v = v.wrapping_add(1);
        }
    }
}

impl CpuBus for PhysicalMemory {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault> {
        self.ram
            .get(addr as usize)
            .copied()
            .ok_or(Fault::MemoryViolation { addr })
    }

    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), Fault> {
        self.write_all(addr, &[val])
    }

    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), Fault> {
        self.write_all(addr, &val.to_le_bytes())
    }

    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), Fault> {
        self.write_all(addr, &val.to_le_bytes())
    }

    fn io_read(&mut self, port: u16, size: OperandSize) -> Result<u32, Fault> {
        tracing::warn!(port, bits = size.bits(), "read from unhandled I/O port");
        Ok(size.mask())
    }

    fn io_write(&mut self, port: u16, size: OperandSize, val: u32) -> Result<(), Fault> {
        if port == DEBUG_PORT {
            self.debug_out.push(val as u8);
            return Ok(());
        }
        tracing::warn!(port, bits = size.bits(), val, "write to unhandled I/O port");
        Ok(())
    }

    fn code_page_version(&self, page: u32) -> u32 {
        self.page_versions.get(page as usize).copied().unwrap_or(0)
    }
}
