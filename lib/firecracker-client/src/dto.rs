//! Control-plane wire bodies
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Boot source descriptor
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootSource {
    /// Kernel boot arguments
    pub boot_args: Option<String>,
    /// Host level path to the initrd image used to boot the guest
    pub initrd_path: Option<String>,
    /// Host level path to the kernel image used to boot the guest
    pub kernel_image_path: String,
}

/// Block device descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drive {
    pub drive_id: String,
    /// Host level path for the guest drive
    pub path_on_host: String,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

/// Describes the number of vCPUs and memory size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfiguration {
    /// Number of vCPUs (either 1 or an even number)
    pub vcpu_count: isize,
    /// Memory size of VM in MiB
    pub mem_size_mib: isize,
}

/// Defines a network interface
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub guest_mac: Option<String>,
    /// Host level path for the guest network interface
    pub host_dev_name: String,
    pub iface_id: String,
}

/// Variant wrapper containing the real action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceActionInfo {
    pub action_type: ActionType,
}

/// Enumeration indicating what type of action is contained in the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "InstanceStart")]
    InstanceStart,
}

/// Body of `PATCH /vm`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub state: VmState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VmState {
    #[serde(rename = "Paused")]
    Paused,
    #[serde(rename = "Resumed")]
    Resumed,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCreateParams {
    /// Type of snapshot to create. It is optional and by default, a full snapshot is created
    pub snapshot_type: Option<SnapshotType>,
    /// Path to the file that will contain the guest memory
    pub mem_file_path: String,
    /// Path to the file that will contain the microVM state
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SnapshotType {
    #[serde(rename = "Full")]
    Full,
    #[serde(rename = "Diff")]
    Diff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemoryBackendType {
    #[serde(rename = "File")]
    File,
    #[serde(rename = "Uffd")]
    Uffd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBackend {
    pub backend_type: MemoryBackendType,
    /// Based on 'backend_type' it is either
    /// 1) Path to the file that contains the guest memory to be loaded
    /// 2) Path to the UDS where a process is listening for a UFFD initialization
    /// control payload
    pub backend_path: String,
}

/// Defines the configuration used for handling snapshot resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLoadParams {
    pub enable_diff_snapshots: bool,
    /// Configuration for the backend that handles memory load
    pub mem_backend: MemoryBackend,
    /// Path to the file that contains the microVM state to be loaded
    pub snapshot_path: String,
    /// When set to true, the vm is also resumed if the snapshot load is successful
    pub resume_vm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boot_source_omits_absent_initrd() {
        let body = serde_json::to_value(BootSource {
            boot_args: Some("console=ttyS0 reboot=k panic=1 pci=off quiet".into()),
            initrd_path: None,
            kernel_image_path: "./vmlinux.bin".into(),
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "boot_args": "console=ttyS0 reboot=k panic=1 pci=off quiet",
                "kernel_image_path": "./vmlinux.bin",
            })
        );
    }

    #[test]
    fn vm_state_patch_body() {
        let body = serde_json::to_value(Vm {
            state: VmState::Paused,
        })
        .unwrap();
        assert_eq!(body, json!({ "state": "Paused" }));

        let body = serde_json::to_value(Vm {
            state: VmState::Resumed,
        })
        .unwrap();
        assert_eq!(body, json!({ "state": "Resumed" }));
    }

    #[test]
    fn snapshot_load_body() {
        let body = serde_json::to_value(SnapshotLoadParams {
            enable_diff_snapshots: false,
            mem_backend: MemoryBackend {
                backend_type: MemoryBackendType::File,
                backend_path: "/tmp/fc-snapshot/vm_mem".into(),
            },
            snapshot_path: "/tmp/fc-snapshot/vm_state".into(),
            resume_vm: true,
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "enable_diff_snapshots": false,
                "mem_backend": {
                    "backend_type": "File",
                    "backend_path": "/tmp/fc-snapshot/vm_mem",
                },
                "snapshot_path": "/tmp/fc-snapshot/vm_state",
                "resume_vm": true,
            })
        );
    }
}
