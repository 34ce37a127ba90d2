//! The real node runtime and relay over turmoil's simulated TCP.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use lockring_core::{Environment, Node, NodeLayout, Party, Role, Roster};
use lockring_crypto::{ClusterKey, CryptoProvider, Keypair, MlKemProvider, PartyId};
use lockring_harness::SimEnv;
use lockring_node::{NodeConfig, Relay, spawn_node};
use turmoil::{
    Builder,
    net::{TcpListener, TcpStream},
};

const RELAY_BIND: &str = "0.0.0.0:7000";
const RELAY_ADDR: &str = "relay:7000";

struct Ring {
    roster: Arc<Roster>,
    keypairs: Vec<Keypair>,
}

fn ring(seed: u64, size: usize) -> Ring {
    let env = SimEnv::with_seed(seed);
    let keypairs: Vec<_> = (0..size)
        .map(|_| MlKemProvider.generate_keypair(env.random_seed()).unwrap())
        .collect();
    let parties = keypairs
        .iter()
        .enumerate()
        .map(|(i, kp)| Party {
            id: PartyId::new(&format!("p{i}")).unwrap(),
            public_key: kp.public.clone(),
        })
        .collect();
    Ring { roster: Arc::new(Roster::new("turmoil", parties).unwrap()), keypairs }
}

async fn run_relay() -> turmoil::Result {
    let relay = Relay::new(NodeConfig::default());
    let listener = TcpListener::bind(RELAY_BIND).await?;
    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(Arc::clone(&relay).serve(stream));
    }
}

#[test]
fn nodes_agree_and_exchange_messages_through_relay() {
    const SIZE: usize = 3;

    let mut sim = Builder::new().simulation_duration(Duration::from_secs(120)).build();
    let ring = ring(1, SIZE);
    let keys: Arc<Mutex<Vec<Option<ClusterKey>>>> = Arc::new(Mutex::new(vec![None; SIZE]));

    sim.host("relay", run_relay);

    for index in 0..SIZE {
        let layout = NodeLayout {
            cluster: Arc::clone(&ring.roster),
            cluster_index: index,
            leader: None,
            role: Role::Standalone,
        };
        let secret = ring.keypairs[index].secret.clone();
        let keys = Arc::clone(&keys);

        sim.client(format!("node{index}"), async move {
            let env = SimEnv::with_seed(100 + index as u64);
            let node = Node::new(env, MlKemProvider, layout, secret)?;
            let stream = TcpStream::connect(RELAY_ADDR).await?;
            let mut handle = spawn_node(node, stream, None, &NodeConfig::default());

            let key = handle.wait_for_cluster_key().await?;
            keys.lock().unwrap()[index] = Some(key);

            if index == 0 {
                handle.send_message("over turmoil").await?;
                // Keep the connection up while the others read
                tokio::time::sleep(Duration::from_secs(10)).await;
            } else {
                let message = handle.next_message().await.unwrap();
                assert_eq!(message.sender, 0);
                assert_eq!(message.plaintext, b"over turmoil");
            }
            Ok(())
        });
    }

    sim.run().unwrap();

    let keys = keys.lock().unwrap();
    let first = keys[0].clone().unwrap();
    assert!(keys.iter().all(|k| k.as_ref() == Some(&first)));
}

#[test]
fn late_joiner_catches_up_from_relay_history() {
    const SIZE: usize = 3;

    let mut sim = Builder::new().simulation_duration(Duration::from_secs(120)).build();
    let ring = ring(2, SIZE);
    let keys: Arc<Mutex<Vec<Option<ClusterKey>>>> = Arc::new(Mutex::new(vec![None; SIZE]));

    sim.host("relay", run_relay);

    for index in 0..SIZE {
        let layout = NodeLayout {
            cluster: Arc::clone(&ring.roster),
            cluster_index: index,
            leader: None,
            role: Role::Standalone,
        };
        let secret = ring.keypairs[index].secret.clone();
        let keys = Arc::clone(&keys);

        sim.client(format!("node{index}"), async move {
            if index == SIZE - 1 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let env = SimEnv::with_seed(200 + index as u64);
            let node = Node::new(env, MlKemProvider, layout, secret)?;
            let stream = TcpStream::connect(RELAY_ADDR).await?;
            let mut handle = spawn_node(node, stream, None, &NodeConfig::default());

            let key = handle.wait_for_cluster_key().await?;
            keys.lock().unwrap()[index] = Some(key);
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
    }

    sim.run().unwrap();

    let keys = keys.lock().unwrap();
    assert!(keys.iter().all(Option::is_some));
    assert!(keys.windows(2).all(|w| w[0] == w[1]));
}
