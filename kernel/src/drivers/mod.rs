//! Device drivers living below the external-collaborator boundary
//! (`fs::blockdev`). PCI config-space access (C10's discovery step) and
//! the NVMe core itself.

/// Both the PCI config-space scan and the NVMe core it feeds are
/// x86-64-only: this kernel's AArch64 target (QEMU `virt`) gets no PCIe
/// ECAM window through `BootInfo`, so there is no bus to discover a
/// controller on and no `PciDevice` to hand `NvmeController::init`.
#[cfg(target_arch = "x86_64")]
pub mod nvme;
#[cfg(target_arch = "x86_64")]
pub mod pci;
