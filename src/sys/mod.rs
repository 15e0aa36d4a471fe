// src/sys/mod.rs
// 🛡️ Every side effect goes through `traits::Host`; components only hold trait objects.

pub mod traits;     // Global contracts
pub mod host;       // Real process/filesystem access
pub mod profile;    // OS, architecture and package manager detection
pub mod prompt;     // Operator confirmation
pub mod privilege;  // One-shot sudo elevation
pub mod toolchain;  // uv bootstrap
pub mod packages;   // dnf / apt / pacman strategies
pub mod kmod;       // Kernel module install
pub mod device;     // Module config + /dev/video10
pub mod groups;     // video group membership
pub mod app;        // Application install
pub mod systemd;    // User service registration
pub mod status;     // Read-only health report

#[cfg(test)]
pub mod testing;
