//! Block device external-collaborator surface. Closed tag set per
//! spec.md §9's design note ("`BlockDevice ∈ {Nvme, UsbMassStorage,
//! Slice}`"), grounded on `doublegate-VeridianOS/kernel/src/fs/
//! blockdev.rs`'s method set (`read_blocks`/`write_blocks`/`flush`/
//! `block_size`/`block_count`) but expressed as a tagged enum instead of
//! the teacher's `dyn BlockDevice` trait object — this kernel never has
//! more than one storage backend live at a time, and a closed enum lets
//! `fs::fd::FileDescriptor::File` match on it exhaustively.

use alloc::boxed::Box;

#[cfg(target_arch = "x86_64")]
use crate::drivers::nvme::NvmeController;
use crate::error::{KernelError, KernelResult};

pub enum BlockDevice {
    /// x86-64 only — see `drivers::mod`'s note on PCI/NVMe discovery.
    #[cfg(target_arch = "x86_64")]
    Nvme(NvmeController),
    /// xHCI/BOT is out of this core's scope (spec.md §1 Non-goals); the
    /// variant exists only so the tag set spec.md §9 names is closed.
    UsbMassStorage,
    /// A sub-range of another block device, for raw partition access
    /// without parsing a GPT/MBR.
    Slice {
        inner: Box<BlockDevice>,
        start_block: u64,
        block_count: u64,
    },
}

impl BlockDevice {
    pub fn block_size(&self) -> usize {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Nvme(ctrl) => ctrl.lba_size,
            Self::UsbMassStorage => 512,
            Self::Slice { inner, .. } => inner.block_size(),
        }
    }

    pub fn block_count(&self) -> u64 {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Nvme(ctrl) => ctrl.max_lba,
            Self::UsbMassStorage => 0,
            Self::Slice { block_count, .. } => *block_count,
        }
    }

    pub fn read_blocks(&mut self, start_block: u64, count: u16, buf_phys: u64, buf_size: usize) -> KernelResult<()> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Nvme(ctrl) => ctrl.read_lba(start_block, count, buf_phys, buf_size),
            Self::UsbMassStorage => Err(KernelError::UnsupportedFeature {
                feature: "usb_mass_storage",
            }),
            Self::Slice { inner, start_block: base, block_count: len } => {
                if start_block + count as u64 > *len {
                    return Err(KernelError::InvalidArgument {
                        name: "start_block",
                        value: "out_of_slice_range",
                    });
                }
                inner.read_blocks(base + start_block, count, buf_phys, buf_size)
            }
        }
    }

    pub fn write_blocks(&mut self, start_block: u64, count: u16, buf_phys: u64, buf_size: usize) -> KernelResult<()> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Nvme(ctrl) => ctrl.write_lba(start_block, count, buf_phys, buf_size),
            Self::UsbMassStorage => Err(KernelError::UnsupportedFeature {
                feature: "usb_mass_storage",
            }),
            Self::Slice { inner, start_block: base, block_count: len } => {
                if start_block + count as u64 > *len {
                    return Err(KernelError::InvalidArgument {
                        name: "start_block",
                        value: "out_of_slice_range",
                    });
                }
                inner.write_blocks(base + start_block, count, buf_phys, buf_size)
            }
        }
    }

    pub fn flush(&mut self) -> KernelResult<()> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Nvme(ctrl) => ctrl.flush(),
            Self::UsbMassStorage => Err(KernelError::UnsupportedFeature {
                feature: "usb_mass_storage",
            }),
            Self::Slice { inner, .. } => inner.flush(),
        }
    }
}
