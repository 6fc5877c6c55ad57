//! Default container images.
//!
//! Each entry can be overridden at startup through its environment variable.
//! Entries with an inventory variable are injected into every NodeSet
//! inventory unless the user already set that variable.

/// One default container image.
pub struct ImageDefault {
    /// Key in every container image map (`Version`, Deployment status).
    pub field: &'static str,
    /// Environment variable overriding the default.
    pub env: &'static str,
    /// Hardcoded fallback.
    pub image: &'static str,
    /// Inventory group variable carrying this image, if any.
    pub inventory_var: Option<&'static str>,
}

/// Image map key of the automation runner image.
pub const RUNNER_IMAGE_FIELD: &str = "ansibleeeImage";

/// Image map key of the OS image used for hardware provisioning.
pub const OS_IMAGE_FIELD: &str = "osContainerImage";

pub const DEFAULT_IMAGES: &[ImageDefault] = &[
    ImageDefault {
        field: "agentImage",
        env: "RELATED_IMAGE_AGENT_IMAGE_URL_DEFAULT",
        image: "quay.io/openstack-k8s-operators/openstack-baremetal-operator-agent:current-podified",
        inventory_var: None,
    },
    ImageDefault {
        field: RUNNER_IMAGE_FIELD,
        env: "RELATED_IMAGE_ANSIBLEEE_IMAGE_URL_DEFAULT",
        image: "quay.io/openstack-k8s-operators/openstack-ansibleee-runner:latest",
        inventory_var: None,
    },
    ImageDefault {
        field: "edpmFrrImage",
        env: "RELATED_IMAGE_EDPM_FRR_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-frr:current-podified",
        inventory_var: Some("edpm_frr_image"),
    },
    ImageDefault {
        field: "edpmIscsidImage",
        env: "RELATED_IMAGE_EDPM_ISCSID_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-iscsid:current-podified",
        inventory_var: Some("edpm_iscsid_image"),
    },
    ImageDefault {
        field: "edpmLogrotateCrondImage",
        env: "RELATED_IMAGE_EDPM_LOGROTATE_CROND_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-cron:current-podified",
        inventory_var: Some("edpm_logrotate_crond_image"),
    },
    ImageDefault {
        field: "edpmMultipathdImage",
        env: "RELATED_IMAGE_EDPM_MULTIPATHD_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-multipathd:current-podified",
        inventory_var: Some("edpm_multipathd_image"),
    },
    ImageDefault {
        field: "edpmNeutronDhcpAgentImage",
        env: "RELATED_IMAGE_EDPM_NEUTRON_DHCP_AGENT_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-neutron-dhcp-agent:current-podified",
        inventory_var: Some("edpm_neutron_dhcp_image"),
    },
    ImageDefault {
        field: "edpmNeutronMetadataAgentImage",
        env: "RELATED_IMAGE_EDPM_NEUTRON_METADATA_AGENT_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-neutron-metadata-agent-ovn:current-podified",
        inventory_var: Some("edpm_neutron_metadata_agent_image"),
    },
    ImageDefault {
        field: "edpmNeutronOvnAgentImage",
        env: "RELATED_IMAGE_EDPM_NEUTRON_OVN_AGENT_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-neutron-ovn-agent:current-podified",
        inventory_var: Some("edpm_neutron_ovn_agent_image"),
    },
    ImageDefault {
        field: "edpmNeutronSriovAgentImage",
        env: "RELATED_IMAGE_EDPM_NEUTRON_SRIOV_AGENT_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-neutron-sriov-agent:current-podified",
        inventory_var: Some("edpm_neutron_sriov_image"),
    },
    ImageDefault {
        field: "novaComputeImage",
        env: "RELATED_IMAGE_NOVA_COMPUTE_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-nova-compute:current-podified",
        inventory_var: Some("edpm_nova_compute_image"),
    },
    ImageDefault {
        field: "ovnControllerImage",
        env: "RELATED_IMAGE_OVN_CONTROLLER_AGENT_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-ovn-controller:current-podified",
        inventory_var: Some("edpm_ovn_controller_agent_image"),
    },
    ImageDefault {
        field: "edpmOvnBgpAgentImage",
        env: "RELATED_IMAGE_EDPM_OVN_BGP_AGENT_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-ovn-bgp-agent:current-podified",
        inventory_var: Some("edpm_ovn_bgp_agent_image"),
    },
    ImageDefault {
        field: "ceilometerComputeImage",
        env: "RELATED_IMAGE_CEILOMETER_COMPUTE_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-telemetry-ceilometer-compute:current-podified",
        inventory_var: Some("edpm_telemetry_ceilometer_compute_image"),
    },
    ImageDefault {
        field: "ceilometerIpmiImage",
        env: "RELATED_IMAGE_CEILOMETER_IPMI_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/openstack-telemetry-ceilometer-ipmi:current-podified",
        inventory_var: Some("edpm_telemetry_ceilometer_ipmi_image"),
    },
    ImageDefault {
        field: "edpmNodeExporterImage",
        env: "RELATED_IMAGE_EDPM_NODE_EXPORTER_IMAGE_URL_DEFAULT",
        image: "quay.io/prometheus/node-exporter:v1.5.0",
        inventory_var: Some("edpm_telemetry_node_exporter_image"),
    },
    ImageDefault {
        field: "edpmKeplerImage",
        env: "RELATED_IMAGE_EDPM_KEPLER_IMAGE_URL_DEFAULT",
        image: "quay.io/sustainable_computing_io/kepler:release-0.7.12",
        inventory_var: Some("edpm_telemetry_kepler_image"),
    },
    ImageDefault {
        field: OS_IMAGE_FIELD,
        env: "RELATED_IMAGE_OS_CONTAINER_IMAGE_URL_DEFAULT",
        image: "quay.io/podified-antelope-centos9/edpm-hardened-uefi:current-podified",
        inventory_var: None,
    },
];
