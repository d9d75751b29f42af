/// Canned replies for the in-app help assistant, picked by keyword.
struct Topic {
    keywords: &'static [&'static str],
    reply: &'static str,
}

const TOPICS: &[Topic] = &[
    Topic {
        keywords: &["kyc", "verify", "verification", "identity", "document"],
        reply: "To verify your identity, open Profile → KYC and upload a government ID plus a selfie. \
                An admin reviews submissions; if something needs fixing you'll be able to edit and resubmit.",
    },
    Topic {
        keywords: &["list", "listing", "post", "lend", "add item", "upload item"],
        reply: "Once your KYC is approved you can list an item from Dashboard → Add Item. \
                New listings and any edits are reviewed by an admin before shoppers can see them.",
    },
    Topic {
        keywords: &["cancel", "refund"],
        reply: "You can cancel a booking any time before it is completed from My Bookings. \
                Please give a short reason so the other party knows what happened.",
    },
    Topic {
        keywords: &["pay", "payment", "deposit", "esewa"],
        reply: "After the lender accepts your request the booking moves to 'payment pending'. \
                Pay the deposit from the booking page to confirm your dates.",
    },
    Topic {
        keywords: &["book", "booking", "rent", "reserve", "available", "availability", "dates"],
        reply: "Pick your dates on the item page and send a request. The lender can accept or reject it; \
                dates already held by another booking can't be requested.",
    },
    Topic {
        keywords: &["review", "rating", "feedback"],
        reply: "Reviews open once a booking is completed. Each booking can be reviewed once.",
    },
    Topic {
        keywords: &["report", "dispute", "problem", "scam", "damage", "damaged"],
        reply: "Sorry to hear that. Use Help → Report an issue and include the booking if there is one; \
                our admins will follow up.",
    },
    Topic {
        keywords: &["chat", "message", "contact"],
        reply: "Use the Message button on any listing or booking to chat with the other person.",
    },
];

const GREETING: &str = "Hi! I can help with bookings, payments, listings, KYC, reviews and reports. What do you need?";
const FALLBACK: &str = "I'm not sure about that one. Try asking about bookings, payments, listings, KYC or reports, \
                        or file a report and an admin will get back to you.";

pub struct Chatbot;

impl Chatbot {
    pub fn reply(message: &str) -> &'static str {
        let text = message.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.iter().any(|w| matches!(*w, "hi" | "hello" | "hey" | "namaste")) && words.len() <= 3 {
            return GREETING;
        }

        TOPICS
            .iter()
            .map(|topic| {
                let score = topic
                    .keywords
                    .iter()
                    .filter(|k| {
                        if k.contains(' ') {
                            text.contains(*k)
                        } else {
                            words.contains(k)
                        }
                    })
                    .count();
                (score, topic)
            })
            .filter(|(score, _)| *score > 0)
            // first topic wins ties
            .fold(None, |best: Option<(usize, &Topic)>, (score, topic)| match best {
                Some((best_score, _)) if best_score >= score => best,
                _ => Some((score, topic)),
            })
            .map(|(_, topic)| topic.reply)
            .unwrap_or(FALLBACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greets() {
        assert_eq!(Chatbot::reply("Hello!"), GREETING);
    }

    #[test]
    fn routes_by_keyword() {
        assert!(Chatbot::reply("How do I pay the deposit?").contains("deposit"));
        assert!(Chatbot::reply("my KYC got rejected").contains("KYC"));
        assert!(Chatbot::reply("I want to cancel").contains("cancel"));
    }

    #[test]
    fn best_score_wins() {
        // "payment" and "booking" both match; payment has two hits.
        assert!(Chatbot::reply("booking payment deposit").contains("Pay the deposit"));
    }

    #[test]
    fn unknown_falls_back() {
        assert_eq!(Chatbot::reply("what's the weather"), FALLBACK);
    }
}
