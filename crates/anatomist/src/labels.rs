//! Human-readable socket labels (Winsock `AF_*`, `IPPROTO_*` and `SOCK_*`
//! codes, named after their .NET enumeration members).

pub const UNCHARTED: &str = "Uncharted";
pub const INTER_NETWORK: &str = "InterNetwork";

pub fn family(code: i64) -> &'static str {
    match code {
        -1 => "Unknown",
        0 => "Unspecified",
        1 => "Unix",
        2 => INTER_NETWORK,
        3 => "ImpLink",
        4 => "Pup",
        5 => "Chaos",
        6 => "NS",
        7 => "Osi",
        8 => "Ecma",
        9 => "DataKit",
        10 => "Ccitt",
        11 => "Sna",
        12 => "DecNet",
        13 => "DataLink",
        14 => "Lat",
        15 => "HyperChannel",
        16 => "AppleTalk",
        17 => "NetBios",
        18 => "VoiceView",
        19 => "FireFox",
        21 => "Banyan",
        22 => "Atm",
        24 => "Cluster",
        26 => "Irda",
        28 => "NetworkDesigners",
        29 => "Max",
        623 => "InterNetworkV",
        65536 => "Packet",
        65537 => "ControllerAreaNetwork",
        1284425 => "Ieee",
        _ => UNCHARTED,
    }
}

pub fn protocol(code: i64) -> &'static str {
    match code {
        -1 => "Unknown",
        0 => "Unspecified",
        1 => "Icmp",
        2 => "Igmp",
        3 => "Ggp",
        4 => "IPv4",
        6 => "Tcp",
        12 => "Pup",
        17 => "Udp",
        22 => "Idp",
        41 => "IPv6",
        43 => "IPv6RoutingHeader",
        44 => "IPv6FragmentHeader",
        50 => "IPSecEncapsulatingSecurityPayload",
        51 => "IPSecAuthenticationHeader",
        58 => "IcmpV6",
        59 => "IPv6NoNextHeader",
        60 => "IPv6DestinationOptions",
        77 => "ND",
        255 => "Raw",
        1000 => "Ipx",
        1256 => "Spx",
        1257 => "SpxII",
        _ => UNCHARTED,
    }
}

pub fn socket_type(code: i64) -> &'static str {
    match code {
        -1 => "Unknown",
        1 => "Stream",
        2 => "Dgram",
        3 => "Raw",
        4 => "Rdm",
        5 => "Seqpacket",
        _ => UNCHARTED,
    }
}
