//! End-to-end tests for the IKE_SA_INIT exchange
//!
//! Drives an initiator and a responder task against each other, passing
//! every message through the wire codec the way the scheduler would.

use std::net::SocketAddr;
use std::sync::Arc;

use varen_proto::bus::{Alert, Bus};
use varen_proto::config::{
    AuthRound, ConfigStore, CredentialStore, IkeConfig, PeerConfig, SignatureScheme,
};
use varen_proto::crypto::hash::HashAlgorithm;
use varen_proto::crypto::kex::methods;
use varen_proto::ikev2::constants::{ExchangeType, NotifyType, PayloadType};
use varen_proto::ikev2::message::IkeMessage;
use varen_proto::ikev2::payload::{IkePayload, KePayload, NoncePayload, SaPayload};
use varen_proto::ikev2::proposal::{Proposal, ProtocolId, Transform, TransformType};
use varen_proto::ikev2::redirect::{redirect_data_create, redirect_data_parse, GatewayIdentity};
use varen_proto::ikev2::sa::{Extension, IkeSa, IkeSaId};
use varen_proto::ikev2::tasks::ike_init::{IkeInitTask, RekeySource, MAX_RETRIES};
use varen_proto::ikev2::tasks::{Task, TaskStatus};

fn ike_proposal(kes: &[u16]) -> Proposal {
    let mut proposal = Proposal::new(1, ProtocolId::Ike)
        .add_transform(Transform::encr(20).with_key_length(256))
        .add_transform(Transform::prf(5));
    for ke in kes {
        proposal = proposal.add_transform(Transform::ke(*ke));
    }
    proposal
}

fn hybrid_proposal(ke: u16, additional: u16) -> Proposal {
    ike_proposal(&[ke]).add_transform(Transform::additional_ke(1, additional))
}

fn config_of(proposals: Vec<Proposal>) -> Arc<IkeConfig> {
    let mut config = IkeConfig::new();
    for proposal in proposals {
        config = config.add_proposal(proposal);
    }
    Arc::new(config)
}

fn local_addr() -> SocketAddr {
    "192.0.2.1:500".parse().unwrap()
}

fn remote_addr() -> SocketAddr {
    "192.0.2.2:500".parse().unwrap()
}

struct Peer {
    sa: IkeSa,
    task: IkeInitTask,
    bus: Arc<Bus>,
}

fn initiator(config: Arc<IkeConfig>) -> Peer {
    let bus = Arc::new(Bus::new());
    let sa = IkeSa::new("conn", 1, IkeSaId::new_initiator(), config)
        .with_bus(bus.clone())
        .with_hosts(local_addr(), remote_addr());
    let task = IkeInitTask::new(&sa, true, None);
    Peer { sa, task, bus }
}

fn responder(initiator_spi: [u8; 8], config: Arc<IkeConfig>) -> Peer {
    let bus = Arc::new(Bus::new());
    let sa = IkeSa::new("conn", 2, IkeSaId::new_responder(initiator_spi), config)
        .with_bus(bus.clone())
        .with_hosts(remote_addr(), local_addr());
    let task = IkeInitTask::new(&sa, false, None);
    Peer { sa, task, bus }
}

/// Push a message through the codec, like the transport would
fn roundtrip(mut message: IkeMessage) -> IkeMessage {
    let bytes = message.to_bytes();
    IkeMessage::from_bytes(&bytes).expect("message must survive the codec")
}

fn ke_payload(message: &IkeMessage) -> &KePayload {
    match message.get_payload(PayloadType::KE) {
        Some(IkePayload::Ke(ke)) => ke,
        _ => panic!("message carries no KE payload"),
    }
}

fn nonce_payload(message: &IkeMessage) -> &NoncePayload {
    match message.get_payload(PayloadType::Nonce) {
        Some(IkePayload::Nonce(nonce)) => nonce,
        _ => panic!("message carries no NONCE payload"),
    }
}

fn sa_payload(message: &IkeMessage) -> &SaPayload {
    match message.get_payload(PayloadType::SA) {
        Some(IkePayload::Sa(sa)) => sa,
        _ => panic!("message carries no SA payload"),
    }
}

/// Run one full IKE_SA_INIT round trip, emulating the scheduler's SPI
/// bookkeeping. Returns (initiator status, responder status).
fn run_init_round(init: &mut Peer, resp: &mut Peer) -> (TaskStatus, TaskStatus) {
    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut request),
        TaskStatus::NeedMore
    );
    let request = roundtrip(request);

    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    let r_status = resp.task.build(&mut resp.sa, &mut response);
    let response = roundtrip(response);

    // the responder SPI travels in the response header
    init.sa.set_responder_spi(resp.sa.id().responder_spi);

    let pre = init.task.pre_process(&mut init.sa, &response);
    let i_status = if pre == TaskStatus::Success {
        init.task.process(&mut init.sa, &response)
    } else {
        pre
    };
    (i_status, r_status)
}

fn assert_same_keys(init: &IkeSa, resp: &IkeSa) {
    let keys_i = init.keymat().keys().expect("initiator keys derived");
    let keys_r = resp.keymat().keys().expect("responder keys derived");
    assert_eq!(*keys_i.sk_d, *keys_r.sk_d);
    assert_eq!(*keys_i.sk_ei, *keys_r.sk_ei);
    assert_eq!(*keys_i.sk_er, *keys_r.sk_er);
    assert_eq!(*keys_i.sk_pi, *keys_r.sk_pi);
    assert_eq!(*keys_i.sk_pr, *keys_r.sk_pr);
}

#[test]
fn happy_path_single_key_exchange() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut init = initiator(config.clone());
    let mut resp = responder(init.sa.id().initiator_spi, config);

    // inspect the request before handing it over
    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut request),
        TaskStatus::NeedMore
    );
    let request = roundtrip(request);
    assert_eq!(sa_payload(&request).proposals.len(), 1);
    let ke = ke_payload(&request);
    assert_eq!(ke.method, methods::ECP_256);
    assert_eq!(ke.key_data.len(), 64);
    assert_eq!(nonce_payload(&request).nonce.len(), 32);
    assert!(request.get_notify(NotifyType::FragmentationSupported).is_some());
    assert!(request.get_notify(NotifyType::SignatureHashAlgorithms).is_some());
    assert!(request.get_notify(NotifyType::RedirectSupported).is_some());

    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::Success
    );
    let response = roundtrip(response);
    assert_eq!(sa_payload(&response).proposals.len(), 1);
    assert!(response.get_notify(NotifyType::ChildlessIkev2Supported).is_some());

    init.sa.set_responder_spi(resp.sa.id().responder_spi);
    assert_eq!(
        init.task.pre_process(&mut init.sa, &response),
        TaskStatus::Success
    );
    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::Success
    );

    assert_same_keys(&init.sa, &resp.sa);

    // extension negotiation propagated both ways
    assert!(init.sa.supports_extension(Extension::Fragmentation));
    assert!(init.sa.supports_extension(Extension::SignatureAuth));
    assert!(init.sa.supports_extension(Extension::Childless));
    assert!(resp.sa.supports_extension(Extension::Fragmentation));
    assert!(resp.sa.supports_extension(Extension::SignatureAuth));
    assert!(resp.sa.supports_extension(Extension::Redirection));

    // both ends agree on the lower nonce
    assert_eq!(init.task.get_lower_nonce(), resp.task.get_lower_nonce());

    // one key event each, not a rekey
    let events = init.bus.ike_keys_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key_exchanges, 1);
    assert!(events[0].rekeyed_from.is_none());
}

#[test]
fn initiator_orders_proposals_around_chosen_method() {
    let config = config_of(vec![
        ike_proposal(&[methods::ECP_256, methods::ECP_384]),
        ike_proposal(&[methods::MODP_2048]),
        ike_proposal(&[methods::ECP_384, methods::ECP_256]),
    ]);
    let mut init = initiator(config);

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut request),
        TaskStatus::NeedMore
    );
    let request = roundtrip(request);

    let proposals = &sa_payload(&request).proposals;
    assert_eq!(proposals.len(), 3);
    // proposals containing the chosen method come first, with the method
    // promoted to the front of its transform type
    assert_eq!(proposals[0].get_algorithm(TransformType::Ke), Some(methods::ECP_256));
    assert_eq!(proposals[1].get_algorithm(TransformType::Ke), Some(methods::ECP_256));
    // the proposal without the chosen method is offered last
    assert_eq!(proposals[2].get_algorithm(TransformType::Ke), Some(methods::MODP_2048));
}

#[test]
fn cookie_retry_reuses_nonce_and_key() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut init = initiator(config.clone());

    let mut first = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut first),
        TaskStatus::NeedMore
    );
    let first = roundtrip(first);
    let first_nonce = nonce_payload(&first).nonce.clone();
    let first_ke = ke_payload(&first).key_data.clone();

    // responder challenges with a cookie only
    let cookie = vec![0xDE, 0xAD, 0xBE, 0xEF];
    let mut challenge = IkeMessage::response(ExchangeType::IkeSaInit, false);
    challenge.add_notify(false, NotifyType::Cookie, cookie.clone());
    let challenge = roundtrip(challenge);

    assert_eq!(
        init.task.pre_process(&mut init.sa, &challenge),
        TaskStatus::Success
    );
    assert_eq!(
        init.task.process(&mut init.sa, &challenge),
        TaskStatus::NeedMore
    );

    // the retry carries the cookie first and reuses nonce and public value
    let mut retry = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut retry),
        TaskStatus::NeedMore
    );
    let retry = roundtrip(retry);
    assert_eq!(retry.get_notify(NotifyType::Cookie).unwrap().data, cookie);
    assert_eq!(
        retry.payloads[0].payload_type(),
        PayloadType::Notify,
        "cookie must be the first payload"
    );
    assert_eq!(nonce_payload(&retry).nonce, first_nonce);
    assert_eq!(ke_payload(&retry).key_data, first_ke);

    // the exchange then completes against a fresh responder
    let mut resp = responder(init.sa.id().initiator_spi, config);
    assert_eq!(
        resp.task.process(&mut resp.sa, &retry),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::Success
    );
    let response = roundtrip(response);
    init.sa.set_responder_spi(resp.sa.id().responder_spi);
    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::Success
    );
    assert_same_keys(&init.sa, &resp.sa);
}

#[test]
fn duplicate_cookie_fails_in_pre_process() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut init = initiator(config);

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    init.task.build(&mut init.sa, &mut request);

    let cookie = vec![0xAB; 16];
    let mut challenge = IkeMessage::response(ExchangeType::IkeSaInit, false);
    challenge.add_notify(false, NotifyType::Cookie, cookie.clone());
    assert_eq!(
        init.task.process(&mut init.sa, &challenge),
        TaskStatus::NeedMore
    );

    // the same cookie again is rejected before any state change
    let mut repeat = IkeMessage::response(ExchangeType::IkeSaInit, false);
    repeat.add_notify(false, NotifyType::Cookie, cookie);
    assert_eq!(
        init.task.pre_process(&mut init.sa, &repeat),
        TaskStatus::Failed
    );
}

#[test]
fn invalid_ke_group_triggers_regroup() {
    let init_config = config_of(vec![ike_proposal(&[methods::ECP_256, methods::ECP_384])]);
    let resp_config = config_of(vec![ike_proposal(&[methods::ECP_384])]);

    let mut init = initiator(init_config);
    let mut resp = responder(init.sa.id().initiator_spi, resp_config.clone());

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    init.task.build(&mut init.sa, &mut request);
    let request = roundtrip(request);
    assert_eq!(ke_payload(&request).method, methods::ECP_256);
    let first_nonce = nonce_payload(&request).nonce.clone();

    // the responder demands its configured group
    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::Failed
    );
    let response = roundtrip(response);
    let notify = response.get_notify(NotifyType::InvalidKePayload).unwrap();
    assert_eq!(notify.data, methods::ECP_384.to_be_bytes().to_vec());

    assert_eq!(
        init.task.pre_process(&mut init.sa, &response),
        TaskStatus::Success
    );
    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::NeedMore
    );

    // the initiator rebuilds with the requested group, nonce unchanged
    let mut retry = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut retry),
        TaskStatus::NeedMore
    );
    let retry = roundtrip(retry);
    assert_eq!(ke_payload(&retry).method, methods::ECP_384);
    assert_eq!(ke_payload(&retry).key_data.len(), 96);
    assert_eq!(nonce_payload(&retry).nonce, first_nonce);

    // and the exchange completes against a fresh responder
    let mut resp = responder(init.sa.id().initiator_spi, resp_config);
    assert_eq!(
        resp.task.process(&mut resp.sa, &retry),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::Success
    );
    let response = roundtrip(response);
    init.sa.set_responder_spi(resp.sa.id().responder_spi);
    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::Success
    );
    assert_same_keys(&init.sa, &resp.sa);
}

#[test]
fn retries_are_bounded() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut init = initiator(config);

    for i in 0..MAX_RETRIES {
        let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
        assert_eq!(
            init.task.build(&mut init.sa, &mut request),
            TaskStatus::NeedMore
        );

        let mut challenge = IkeMessage::response(ExchangeType::IkeSaInit, false);
        challenge.add_notify(false, NotifyType::Cookie, vec![i as u8; 8]);
        assert_eq!(
            init.task.process(&mut init.sa, &challenge),
            TaskStatus::NeedMore
        );
    }

    // the next attempt gives up
    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut request),
        TaskStatus::Failed
    );
}

#[test]
fn multi_ke_hybrid_exchange() {
    let config = config_of(vec![hybrid_proposal(methods::ECP_256, methods::ML_KEM_768)]);
    let mut init = initiator(config.clone());
    let mut resp = responder(init.sa.id().initiator_spi, config);

    // the initial round does not finish the exchange
    let (i_status, r_status) = run_init_round(&mut init, &mut resp);
    assert_eq!(i_status, TaskStatus::NeedMore);
    assert_eq!(r_status, TaskStatus::NeedMore);

    // keys of the first exchange are in place on both ends already
    assert!(init.sa.keymat().is_derived());
    assert!(resp.sa.keymat().is_derived());
    let first_sk_d = init.sa.keymat().keys().unwrap().sk_d.clone();

    // one intermediate round for the ML-KEM exchange
    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut request),
        TaskStatus::NeedMore
    );
    assert_eq!(request.exchange_type(), ExchangeType::IkeIntermediate);
    let request = roundtrip(request);
    // intermediate rounds carry exactly one payload, the KE
    assert_eq!(request.payloads.len(), 1);
    assert_eq!(ke_payload(&request).method, methods::ML_KEM_768);

    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeIntermediate, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::NeedMore
    );
    // derivation happens only after the response was signed
    assert_eq!(
        resp.task.post_build(&mut resp.sa, &response),
        TaskStatus::Success
    );
    let response = roundtrip(response);
    assert_eq!(ke_payload(&response).method, methods::ML_KEM_768);

    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::NeedMore
    );
    assert_eq!(
        init.task.post_process(&mut init.sa, &response),
        TaskStatus::Success
    );

    assert_same_keys(&init.sa, &resp.sa);
    // the chained keys replaced the initial ones
    assert_ne!(*init.sa.keymat().keys().unwrap().sk_d, *first_sk_d);

    // two derivations, the second chained from the SA's own SK_d
    let events = init.bus.ike_keys_events();
    assert_eq!(events.len(), 2);
    assert!(events[0].rekeyed_from.is_none());
    assert_eq!(events[1].rekeyed_from, Some(init.sa.id()));
}

#[test]
fn rekey_inherits_group_and_chains_sk_d() {
    // establish the SA that will be rekeyed
    let old_config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut old_init = initiator(old_config.clone());
    let mut old_resp = responder(old_init.sa.id().initiator_spi, old_config);
    let (i_status, r_status) = run_init_round(&mut old_init, &mut old_resp);
    assert_eq!(i_status, TaskStatus::Success);
    assert_eq!(r_status, TaskStatus::Success);
    let old_sk_d = old_init.sa.keymat().keys().unwrap().sk_d.clone();

    // the new configuration prefers another group, but the previous one wins
    let rekey_config = config_of(vec![ike_proposal(&[methods::ECP_384, methods::ECP_256])]);
    let bus_i = Arc::new(Bus::new());
    let mut new_sa_i = IkeSa::new("conn", 3, IkeSaId::new_initiator(), rekey_config.clone())
        .with_bus(bus_i.clone())
        .with_hosts(local_addr(), remote_addr());
    let mut init_task = IkeInitTask::new(&new_sa_i, true, Some(RekeySource::from_sa(&old_init.sa)));

    let mut request = IkeMessage::request(ExchangeType::CreateChildSa, true);
    assert_eq!(
        init_task.build(&mut new_sa_i, &mut request),
        TaskStatus::NeedMore
    );
    let request = roundtrip(request);
    assert_eq!(ke_payload(&request).method, methods::ECP_256);
    // rekey requests carry no first-exchange notifies
    assert!(request.get_notify(NotifyType::RedirectSupported).is_none());
    assert!(request.get_notify(NotifyType::FragmentationSupported).is_none());
    // the new initiator SPI rides in the proposal
    for proposal in &sa_payload(&request).proposals {
        assert_eq!(proposal.spi, new_sa_i.id().initiator_spi.to_vec());
    }

    // the responder's preference must not override the reused group, or it
    // would demand its own first choice with INVALID_KE_PAYLOAD
    let resp_config = config_of(vec![ike_proposal(&[methods::ECP_256, methods::ECP_384])]);
    let mut new_sa_r = IkeSa::new("conn", 4, IkeSaId::new_responder([0u8; 8]), resp_config)
        .with_hosts(remote_addr(), local_addr());
    let mut resp_task =
        IkeInitTask::new(&new_sa_r, false, Some(RekeySource::from_sa(&old_resp.sa)));

    assert_eq!(
        resp_task.process(&mut new_sa_r, &request),
        TaskStatus::NeedMore
    );
    // the responder learned the initiator SPI from the proposal
    assert_eq!(new_sa_r.id().initiator_spi, new_sa_i.id().initiator_spi);

    let mut response = IkeMessage::response(ExchangeType::CreateChildSa, false);
    assert_eq!(
        resp_task.build(&mut new_sa_r, &mut response),
        TaskStatus::Success
    );
    let response = roundtrip(response);
    assert_eq!(
        sa_payload(&response).proposals[0].spi,
        new_sa_r.id().responder_spi.to_vec()
    );

    assert_eq!(
        init_task.process(&mut new_sa_i, &response),
        TaskStatus::Success
    );
    // both ends now agree on the new SA identifier
    assert_eq!(new_sa_i.id(), new_sa_r.id());

    assert_same_keys(&new_sa_i, &new_sa_r);
    assert_ne!(*new_sa_i.keymat().keys().unwrap().sk_d, *old_sk_d);

    // the key event names the rekeyed predecessor
    let events = bus_i.ike_keys_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rekeyed_from, Some(old_init.sa.id()));
}

#[test]
fn redirect_is_followed_when_nonce_matches() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut init = initiator(config.clone());
    let mut resp = responder(init.sa.id().initiator_spi, config);
    resp.sa
        .set_redirect_on_init(GatewayIdentity::Ipv4("10.0.0.2".parse().unwrap()));

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    init.task.build(&mut init.sa, &mut request);
    let request = roundtrip(request);

    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::Failed
    );
    let response = roundtrip(response);

    // the notify echoes our nonce next to the gateway identity
    let notify = response.get_notify(NotifyType::Redirect).unwrap();
    let (gateway, nonce) = redirect_data_parse(&notify.data).unwrap();
    assert_eq!(gateway, GatewayIdentity::Ipv4("10.0.0.2".parse().unwrap()));
    assert_eq!(nonce, nonce_payload(&request).nonce);

    assert_eq!(
        init.task.pre_process(&mut init.sa, &response),
        TaskStatus::Success
    );
    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::NeedMore
    );
    assert_eq!(init.sa.other_host().unwrap().ip().to_string(), "10.0.0.2");
    assert_eq!(init.sa.redirected_from(), Some(remote_addr()));

    // the next attempt announces where we were redirected from
    let mut retry = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init.task.build(&mut init.sa, &mut retry),
        TaskStatus::NeedMore
    );
    let retry = roundtrip(retry);
    let redirected_from = retry.get_notify(NotifyType::RedirectedFrom).unwrap();
    let (gateway, _) = redirect_data_parse(&redirected_from.data).unwrap();
    assert_eq!(gateway, GatewayIdentity::from_socket_addr(remote_addr()));
    assert!(retry.get_notify(NotifyType::RedirectSupported).is_none());
}

#[test]
fn redirect_with_wrong_nonce_is_rejected() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut init = initiator(config);

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    init.task.build(&mut init.sa, &mut request);

    let gateway = GatewayIdentity::Ipv4("10.0.0.2".parse().unwrap());
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    response.add_notify(
        true,
        NotifyType::Redirect,
        redirect_data_create(&gateway, &[0x13; 32]),
    );

    assert_eq!(
        init.task.pre_process(&mut init.sa, &response),
        TaskStatus::Failed
    );
    // no state change happened
    assert_eq!(init.sa.other_host(), Some(remote_addr()));
    assert!(init.sa.redirected_from().is_none());
}

#[test]
fn responder_requests_group_for_mismatched_ke_payload() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_384])]);
    let mut resp = responder([7u8; 8], config);

    // a request offering ECP-384 but carrying an ECP-256 public value
    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    request.add_payload(IkePayload::Sa(SaPayload::new(vec![ike_proposal(&[
        methods::ECP_384,
    ])])));
    request.add_payload(IkePayload::Ke(KePayload::new(
        methods::ECP_256,
        vec![0xAA; 64],
    )));
    request.add_payload(IkePayload::Nonce(
        NoncePayload::new(vec![0x55; 32]).unwrap(),
    ));
    let request = roundtrip(request);

    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::Failed
    );
    let notify = response.get_notify(NotifyType::InvalidKePayload).unwrap();
    assert_eq!(notify.data, methods::ECP_384.to_be_bytes().to_vec());
}

#[test]
fn unacceptable_proposals_raise_alerts_on_both_ends() {
    let init_config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let resp_config = config_of(vec![ike_proposal(&[methods::MODP_2048])]);

    let mut init = initiator(init_config.clone());
    let mut resp = responder(init.sa.id().initiator_spi, resp_config);

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    init.task.build(&mut init.sa, &mut request);
    let request = roundtrip(request);

    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp.task.build(&mut resp.sa, &mut response),
        TaskStatus::Failed
    );
    let response = roundtrip(response);
    let notify = response.get_notify(NotifyType::NoProposalChosen).unwrap();
    assert!(notify.critical);

    // the responder saw the initiator's offer
    match &resp.bus.alerts()[..] {
        [Alert::IkeProposalMismatch { proposals }] => {
            assert_eq!(proposals.len(), 1);
            assert_eq!(
                proposals[0].get_algorithm(TransformType::Ke),
                Some(methods::ECP_256)
            );
        }
        other => panic!("unexpected alerts: {:?}", other),
    }

    // the initiator fails and re-announces its configured proposals
    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::Failed
    );
    match &init.bus.alerts()[..] {
        [Alert::IkeProposalMismatch { proposals }] => {
            assert_eq!(
                proposals[0].get_algorithm(TransformType::Ke),
                Some(methods::ECP_256)
            );
        }
        other => panic!("unexpected alerts: {:?}", other),
    }
}

#[test]
fn responder_falls_back_to_alternative_config() {
    let primary = config_of(vec![ike_proposal(&[methods::MODP_2048])]);
    let alternative = config_of(vec![ike_proposal(&[methods::ECP_256])]);

    let mut store = ConfigStore::new();
    store.add(primary.clone());
    store.add(alternative.clone());

    let init_config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let mut init = initiator(init_config);

    let bus = Arc::new(Bus::new());
    let mut resp_sa = IkeSa::new(
        "conn",
        2,
        IkeSaId::new_responder(init.sa.id().initiator_spi),
        primary,
    )
    .with_bus(bus.clone())
    .with_config_store(Arc::new(store))
    .with_hosts(remote_addr(), local_addr());
    let mut resp_task = IkeInitTask::new(&resp_sa, false, None);

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    init.task.build(&mut init.sa, &mut request);
    let mut request = roundtrip(request);
    request.set_endpoints(local_addr(), remote_addr());

    assert_eq!(
        resp_task.process(&mut resp_sa, &request),
        TaskStatus::NeedMore
    );
    // the responder switched to the alternative configuration
    assert!(resp_sa.uses_ike_cfg(&alternative));
    assert!(bus.alerts().is_empty());

    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp_task.build(&mut resp_sa, &mut response),
        TaskStatus::Success
    );
    let response = roundtrip(response);
    init.sa.set_responder_spi(resp_sa.id().responder_spi);
    assert_eq!(
        init.task.process(&mut init.sa, &response),
        TaskStatus::Success
    );
    assert_same_keys(&init.sa, &resp_sa);
}

#[test]
fn pinned_signature_schemes_restrict_hash_notify() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);
    let peer_cfg = Arc::new(PeerConfig::new().add_auth_round(AuthRound {
        ike_signature_schemes: vec![SignatureScheme::EcdsaSha384, SignatureScheme::EcdsaSha384],
    }));

    let bus = Arc::new(Bus::new());
    let mut init_sa = IkeSa::new("conn", 1, IkeSaId::new_initiator(), config.clone())
        .with_bus(bus)
        .with_peer_cfg(peer_cfg)
        .with_hosts(local_addr(), remote_addr());
    let mut init_task = IkeInitTask::new(&init_sa, true, None);

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    assert_eq!(
        init_task.build(&mut init_sa, &mut request),
        TaskStatus::NeedMore
    );
    let request = roundtrip(request);

    // a single 16-bit value, despite the duplicated scheme
    let notify = request.get_notify(NotifyType::SignatureHashAlgorithms).unwrap();
    assert_eq!(notify.data, HashAlgorithm::Sha384.to_u16().to_be_bytes().to_vec());

    // the responder records it and flags the extension
    let mut resp = responder(init_sa.id().initiator_spi, config);
    assert_eq!(
        resp.task.process(&mut resp.sa, &request),
        TaskStatus::NeedMore
    );
    assert!(resp.sa.supports_extension(Extension::SignatureAuth));
    assert!(resp
        .sa
        .keymat()
        .hash_algorithms()
        .contains(HashAlgorithm::Sha384));
    assert_eq!(resp.sa.keymat().hash_algorithms().len(), 1);
}

#[test]
fn ppk_announcement_requires_config_and_credentials() {
    let config = config_of(vec![ike_proposal(&[methods::ECP_256])]);

    // initiator announces USE_PPK when a PPK id is configured for the peer
    let peer_cfg = Arc::new(PeerConfig::new().with_ppk_id("ppk-1"));
    let mut init_sa = IkeSa::new("conn", 1, IkeSaId::new_initiator(), config.clone())
        .with_peer_cfg(peer_cfg)
        .with_hosts(local_addr(), remote_addr());
    let mut init_task = IkeInitTask::new(&init_sa, true, None);

    let mut request = IkeMessage::request(ExchangeType::IkeSaInit, true);
    init_task.build(&mut init_sa, &mut request);
    let request = roundtrip(request);
    assert!(request.get_notify(NotifyType::UsePpk).is_some());

    // responder echoes it only when it has a PPK available
    let mut credentials = CredentialStore::new();
    credentials.add_ppk("ppk-1", vec![1; 32]);
    let mut resp_sa = IkeSa::new(
        "conn",
        2,
        IkeSaId::new_responder(init_sa.id().initiator_spi),
        config.clone(),
    )
    .with_credentials(Arc::new(credentials))
    .with_hosts(remote_addr(), local_addr());
    let mut resp_task = IkeInitTask::new(&resp_sa, false, None);

    assert_eq!(
        resp_task.process(&mut resp_sa, &request),
        TaskStatus::NeedMore
    );
    assert!(resp_sa.supports_extension(Extension::Ppk));
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        resp_task.build(&mut resp_sa, &mut response),
        TaskStatus::Success
    );
    assert!(response.get_notify(NotifyType::UsePpk).is_some());

    // without credentials the responder stays silent
    let mut poor_sa = IkeSa::new(
        "conn",
        3,
        IkeSaId::new_responder(init_sa.id().initiator_spi),
        config,
    )
    .with_hosts(remote_addr(), local_addr());
    let mut poor_task = IkeInitTask::new(&poor_sa, false, None);
    assert_eq!(
        poor_task.process(&mut poor_sa, &request),
        TaskStatus::NeedMore
    );
    let mut response = IkeMessage::response(ExchangeType::IkeSaInit, false);
    assert_eq!(
        poor_task.build(&mut poor_sa, &mut response),
        TaskStatus::Success
    );
    assert!(response.get_notify(NotifyType::UsePpk).is_none());
}
