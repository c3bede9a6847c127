use rtxlink::snapshot::{ParsedConfig, Section};

const RTX1210: &str = include_str!("fixtures/rtx1210_config.txt");

const MINIMAL: &str = "ip lan1 address 192.168.1.1/24\n\
                       ip route default gateway 192.168.1.254\n\
                       ip filter 100 pass * * tcp * www\n";

#[test]
fn minimal_dump_yields_one_record_of_each_kind() {
    let cfg = ParsedConfig::parse(MINIMAL).expect("parse");

    let interfaces = cfg.extract_interfaces();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].name, "lan1");
    assert_eq!(
        interfaces[0].ip_address.as_ref().map(|a| a.address.as_str()),
        Some("192.168.1.1/24")
    );

    let routes = cfg.extract_static_routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].prefix, "0.0.0.0");
    assert_eq!(routes[0].next_hops[0].next_hop, "192.168.1.254");

    let filters = cfg.extract_ip_filters();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].number, 100);
    assert_eq!(filters[0].dest_port, "www");

    // Everything else is simply not configured.
    assert!(cfg.extract_pp_sessions().is_empty());
    assert!(cfg.extract_ipsec_tunnels().is_empty());
    assert!(cfg.extract_l2tp_tunnels().is_empty());
    assert!(cfg.extract_dhcp_scopes().is_empty());
    assert!(cfg.extract_dhcp_bindings().is_empty());
    assert!(cfg.extract_nat_masquerade().is_empty());
    assert!(cfg.extract_ip_filters_dynamic().is_empty());
    assert!(cfg.extract_dns().is_none());
    assert!(cfg.extract_syslog().is_none());
}

#[test]
fn parsing_twice_gives_equal_results() {
    let first = ParsedConfig::parse(RTX1210).expect("first parse");
    let second = ParsedConfig::parse(RTX1210).expect("second parse");

    assert_eq!(first, second);
    assert_eq!(first.digest(), second.digest());
    assert_eq!(first.extract_interfaces(), second.extract_interfaces());
    assert_eq!(first.extract_static_routes(), second.extract_static_routes());
    assert_eq!(first.extract_ip_filters(), second.extract_ip_filters());
    assert_eq!(first.extract_pp_sessions(), second.extract_pp_sessions());
    assert_eq!(first.extract_ipsec_tunnels(), second.extract_ipsec_tunnels());
    assert_eq!(first.extract_dns(), second.extract_dns());
}

#[test]
fn empty_and_comment_only_dumps_are_valid() {
    for raw in ["", "\r\n\r\n", "# RTX1210 Rev.14.01.42\n# Reporting Date: Jan 20\n"] {
        let cfg = ParsedConfig::parse(raw).expect("parse");
        assert_eq!(cfg.command_count(), 0);
        assert_eq!(cfg.sections().collect::<Vec<_>>(), vec![Section::Global]);
        assert!(cfg.extract_interfaces().is_empty());
        assert!(cfg.extract_static_routes().is_empty());
        assert!(cfg.extract_ip_filters().is_empty());
        assert!(cfg.extract_dns().is_none());
    }
}

#[test]
fn malformed_selector_reports_its_line() {
    let err = match ParsedConfig::parse("ip lan1 address 192.168.1.1/24\ntunnel select one\n") {
        Ok(_) => panic!("bad tunnel id"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn fixture_sections() {
    let cfg = ParsedConfig::parse(RTX1210).expect("parse");
    assert_eq!(cfg.tunnel_ids(), vec![1]);
    assert_eq!(cfg.pp_ids(), vec![1]);

    let tunnel = cfg.section_by_name("tunnel 1").expect("tunnel section");
    assert!(tunnel.contains("ipsec tunnel 101"));
    assert!(tunnel.contains("tunnel enable 1"));
    assert!(!tunnel.contains("ip filter"));

    let pp = cfg.section_text(Section::Pp(1)).expect("pp section");
    assert!(pp.contains("pppoe use lan2"));
    assert!(cfg
        .global_commands()
        .any(|line| line.text == "ip filter 1010 reject * * udp,tcp 135 *"));
}

#[test]
fn fixture_records() {
    let cfg = ParsedConfig::parse(RTX1210).expect("parse");

    let lan1 = cfg.interface("lan1").expect("lan1");
    assert_eq!(lan1.description, "office");
    assert_eq!(lan1.secure_filter_in, vec![1010, 1011, 1012, 2000]);
    assert_eq!(lan1.secure_filter_out, vec![3000]);
    assert_eq!(lan1.dynamic_filter_out, vec![200080, 200081]);
    let lan2 = cfg.interface("lan2").expect("lan2");
    assert!(lan2.ip_address.expect("lan2 address").dhcp);
    assert_eq!(cfg.interface("pp1").expect("pp1").nat_descriptor, 1000);

    let routes = cfg.extract_static_routes();
    assert_eq!(routes.len(), 3);
    let default = routes
        .iter()
        .find(|r| r.prefix == "0.0.0.0")
        .expect("default route");
    assert_eq!(default.next_hops[0].interface, "pp 1");
    let private = routes
        .iter()
        .find(|r| r.prefix == "10.0.0.0")
        .expect("10/8");
    assert_eq!(private.mask, "255.0.0.0");
    assert_eq!(private.next_hops[0].distance, 2);

    let filters = cfg.extract_ip_filters();
    assert_eq!(filters.len(), 9);
    let established = filters
        .iter()
        .find(|f| f.number == 200021)
        .expect("established filter");
    assert!(established.established);
    assert_eq!(cfg.extract_ip_filters_dynamic().len(), 2);

    let sessions = cfg.extract_pp_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].interface, "lan2");
    assert!(sessions[0].enabled);

    let bindings = cfg.extract_dhcp_bindings();
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].mac_address, "00:a0:de:12:34:56");
    let scopes = cfg.extract_dhcp_scopes();
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].dns_servers, vec!["192.168.100.1"]);

    let dns = cfg.extract_dns().expect("dns");
    assert_eq!(dns.name_servers, vec!["8.8.8.8", "8.8.4.4"]);
    assert_eq!(dns.domain_name, "example.jp");
    assert!(dns.service_on);
    assert!(dns.private_spoof);
    assert_eq!(dns.server_select.len(), 1);
    assert_eq!(dns.server_select[0].record_type, "any");
    assert_eq!(dns.hosts.len(), 1);
}
